use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::Source;

/// Error category carried end to end in the `code` field of error bodies,
/// so clients never have to guess from message text.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    NoMediaFound,
    NotFound,
    RateLimited,
    Upstream,
    Internal,
}

impl ErrorKind {
    pub fn from_upstream_status(status: u16) -> Self {
        match status {
            404 | 410 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            _ => ErrorKind::Upstream,
        }
    }

    /// Classifies the last line yt-dlp wrote to stderr.
    pub fn from_tool_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("429") || lower.contains("too many requests") {
            ErrorKind::RateLimited
        } else if lower.contains("private video")
            || lower.contains("video unavailable")
            || lower.contains("404")
        {
            ErrorKind::NotFound
        } else if lower.contains("unsupported url") || lower.contains("is not a valid url") {
            ErrorKind::InvalidUrl
        } else {
            ErrorKind::Upstream
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("API responded with status: {status}")]
    UpstreamError { status: u16 },

    #[error("No media found in this post")]
    NoMediaFound,

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("{0}")]
    Tool(String),
}

impl ExtractionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractionError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ExtractionError::UpstreamError { status } => ErrorKind::from_upstream_status(*status),
            ExtractionError::NoMediaFound => ErrorKind::NoMediaFound,
            ExtractionError::Transport(_) => ErrorKind::Upstream,
            ExtractionError::Tool(message) => ErrorKind::from_tool_message(message),
        }
    }
}

impl From<reqwest::Error> for ExtractionError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => ExtractionError::UpstreamError {
                status: status.as_u16(),
            },
            None => ExtractionError::Transport(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<ErrorKind>,
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: Some(ErrorKind::InvalidUrl),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: Some(ErrorKind::Internal),
            details: None,
        }
    }

    pub fn extraction(source: Source, error: ExtractionError) -> Self {
        let code = Some(error.kind());
        match error {
            ExtractionError::InvalidUrl(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
                code,
                details: None,
            },
            ExtractionError::NoMediaFound => Self {
                status: StatusCode::NOT_FOUND,
                message: ExtractionError::NoMediaFound.to_string(),
                code,
                details: None,
            },
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: upstream_failure_message(source).to_string(),
                code,
                details: Some(other.to_string()),
            },
        }
    }
}

fn upstream_failure_message(source: Source) -> &'static str {
    match source {
        Source::Instagram => {
            "Failed to fetch Instagram data. The post might be private or unavailable."
        }
        Source::YouTube => "Failed to fetch video. It might be private or unavailable.",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
            details: self.details,
        });

        (self.status, body).into_response()
    }
}
