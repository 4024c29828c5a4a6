//! Error types
//!
//! One error enum covers relay, recording and gateway operations. Errors that
//! happen inside background tasks never surface here; they are delivered as
//! terminal events instead (see [`crate::relay::Delivery`]).

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay and recording operations
#[derive(Debug, Error)]
pub enum Error {
    /// The upstream could not be reached or did not answer with audio
    #[error("upstream unreachable: {url}: {reason}")]
    UpstreamUnreachable { url: String, reason: String },

    /// A recording with this id is already active
    #[error("recording already active: {0}")]
    RecordingAlreadyActive(String),

    /// The recording destination could not be created or written
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A recording file does not exist
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A filename that would resolve outside the recordings directory
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    /// The file still belongs to an active recording
    #[error("recording in progress: {0}")]
    RecordingInProgress(String),

    /// A gateway command could not be understood
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn upstream(url: &str, reason: impl std::fmt::Display) -> Self {
        Error::UpstreamUnreachable {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable code, used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::UpstreamUnreachable { .. } => "UPSTREAM_UNREACHABLE",
            Error::RecordingAlreadyActive(_) => "RECORDING_ALREADY_ACTIVE",
            Error::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Error::FileNotFound(_) => "FILE_NOT_FOUND",
            Error::InvalidFilename(_) => "INVALID_FILENAME",
            Error::RecordingInProgress(_) => "RECORDING_IN_PROGRESS",
            Error::InvalidCommand(_) => "INVALID_COMMAND",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Http(_) => "HTTP_ERROR",
        }
    }
}
