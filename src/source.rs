use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

static INSTAGRAM_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(www\.)?instagram\.com/(p|reel)/[A-Za-z0-9_-]+/?")
        .expect("instagram url regex")
});

static INSTAGRAM_SHORTCODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(p|reel)/([A-Za-z0-9_-]+)").expect("instagram shortcode regex"));

static YOUTUBE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://)?([a-z]+\.)?(youtube\.com|youtu\.be)/.+").expect("youtube url regex")
});

static YOUTUBE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:youtube\.com/watch\?(?:[^#]*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([A-Za-z0-9_-]+)",
    )
    .expect("youtube id regex")
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Instagram,
    YouTube,
}

impl Source {
    pub fn all() -> [Source; 2] {
        [Source::Instagram, Source::YouTube]
    }

    /// Path segment under `/api/`.
    pub fn api_path(self) -> &'static str {
        match self {
            Source::Instagram => "instagram",
            Source::YouTube => "youtube",
        }
    }

    /// Prefix for downloaded filenames.
    pub fn file_prefix(self) -> &'static str {
        self.api_path()
    }

    /// Fast client-side check applied before any network call.
    pub fn is_valid_url(self, input: &str) -> bool {
        match self {
            Source::Instagram => INSTAGRAM_URL.is_match(input),
            Source::YouTube => YOUTUBE_URL.is_match(input),
        }
    }

    /// Derives the compact identifier the upstream provider is keyed by.
    pub fn identifier(self, input: &str) -> Result<String, ExtractionError> {
        let input = input.trim();
        if !self.is_valid_url(input) {
            return Err(ExtractionError::InvalidUrl(format!("Invalid {self} URL")));
        }

        let captured = match self {
            Source::Instagram => INSTAGRAM_SHORTCODE
                .captures(input)
                .and_then(|captures| captures.get(2)),
            Source::YouTube => YOUTUBE_ID.captures(input).and_then(|captures| captures.get(1)),
        };

        captured
            .map(|value| value.as_str().to_string())
            .ok_or_else(|| ExtractionError::InvalidUrl(format!("Invalid {self} URL")))
    }

    pub fn detect(input: &str) -> Option<Source> {
        Source::all()
            .into_iter()
            .find(|source| source.is_valid_url(input))
    }

    pub fn invalid_url_message(self) -> &'static str {
        match self {
            Source::Instagram => {
                "Please enter a valid Instagram post URL (e.g., https://www.instagram.com/p/...)"
            }
            Source::YouTube => "Please enter a valid YouTube URL",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Instagram => write!(f, "Instagram"),
            Source::YouTube => write!(f, "YouTube"),
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "instagram" | "ig" => Ok(Source::Instagram),
            "youtube" | "yt" => Ok(Source::YouTube),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

pub fn youtube_watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}
