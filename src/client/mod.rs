//! Native rendition of the browser-side Client Controller: the transport to
//! the Adapter, the selection state machine and the download pipeline.

pub mod api;
pub mod controller;
pub mod download;
pub mod video;

use thiserror::Error;

use crate::{error::ErrorKind, source::Source};

pub use api::ApiClient;
pub use controller::{Controller, FetchTicket, Phase, ViewUpdate};
pub use download::{BatchReport, DirectorySink, DownloadOptions, HttpFetcher, run_batch};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("Failed to fetch: {0}")]
    NetworkUnreachable(String),

    #[error("{message}")]
    Api {
        kind: Option<ErrorKind>,
        status: u16,
        message: String,
    },

    #[error("No media found in this post")]
    NoMediaFound,

    #[error("Could not save the download: {0}")]
    Save(String),
}

/// User-facing buckets an error is shown under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connectivity,
    RateLimited,
    NotFound,
    Generic,
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::NetworkUnreachable(_) => ErrorCategory::Connectivity,
            ClientError::NoMediaFound => ErrorCategory::NotFound,
            ClientError::InvalidUrl(_) | ClientError::Save(_) => ErrorCategory::Generic,
            ClientError::Api { kind, message, .. } => match kind {
                Some(ErrorKind::RateLimited) => ErrorCategory::RateLimited,
                Some(ErrorKind::NotFound | ErrorKind::NoMediaFound) => ErrorCategory::NotFound,
                Some(_) => ErrorCategory::Generic,
                None => classify_message(message),
            },
        }
    }

    /// Banner text for this error.
    pub fn user_message(&self, source: Source) -> String {
        if let ClientError::InvalidUrl(message) = self {
            return message.clone();
        }

        match self.category() {
            ErrorCategory::Connectivity => "Cannot connect to backend server. Please wait a moment and try again. The server may be starting up (cold start takes ~10s).".to_string(),
            ErrorCategory::RateLimited => format!(
                "{source} is rate-limiting requests. Please wait 2-3 minutes before trying again."
            ),
            ErrorCategory::NotFound => match source {
                Source::Instagram => "Post not found or is private. Make sure the post is public.".to_string(),
                Source::YouTube => "Video not found or is private. Make sure the video is public.".to_string(),
            },
            ErrorCategory::Generic => self.to_string(),
        }
    }
}

/// Substring heuristic for error bodies that carry no `code`.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();
    if lower.contains("failed to fetch") || lower.contains("networkerror") {
        ErrorCategory::Connectivity
    } else if lower.contains("429") || lower.contains("rate") || lower.contains("wait") {
        ErrorCategory::RateLimited
    } else if lower.contains("404") || lower.contains("not found") || lower.contains("private") {
        ErrorCategory::NotFound
    } else {
        ErrorCategory::Generic
    }
}
