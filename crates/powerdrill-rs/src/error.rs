//! Error type shared by every client operation.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Setup guidance printed when credentials are missing.
pub const SETUP_GUIDE: &str = "Setup guide:\n  \
    1. Create a Teamspace: https://www.youtube.com/watch?v=I-0yGD9HeDw\n  \
    2. Get API credentials: https://www.youtube.com/watch?v=qs-GsUgjb1g";

/// Convenience alias used throughout the crate.
pub type Result<T, E = PowerdrillError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PowerdrillError {
    /// The HTTP layer failed (connect, timeout, body read) after any retries.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success HTTP status.
    #[error("Powerdrill HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response envelope carried a non-zero `code`.
    #[error("Powerdrill API error (code={code}): {message}")]
    Api { code: i64, message: String },

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid input: {0}")]
    Validation(String),

    /// The upload plan and the parts actually transferred disagree.
    #[error("upload protocol violation: {0}")]
    Protocol(String),

    #[error(
        "Dataset {dataset_id} has {invalid} invalid data source(s). Check file format and re-upload."
    )]
    SyncInvalid { dataset_id: String, invalid: u64 },

    #[error("Timed out after {attempts} attempts waiting for dataset {dataset_id} to sync.")]
    SyncTimeout { dataset_id: String, attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("stream produced no data for {0:?}")]
    StreamIdle(Duration),

    #[error(
        "POWERDRILL_USER_ID and POWERDRILL_PROJECT_API_KEY must be set.\n{}",
        SETUP_GUIDE
    )]
    MissingCredentials,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PowerdrillError {
    /// Network or HTTP-level failure, as opposed to an application or local error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::HttpStatus { .. } | Self::StreamIdle(_)
        )
    }
}
