//! Media extraction backend for Instagram posts and YouTube videos, plus a
//! native client that drives selection and downloads against it.

pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod media;
pub mod server;
pub mod source;
pub mod transfer;
