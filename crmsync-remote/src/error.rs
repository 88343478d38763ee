//! Remote access error types.

use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while talking to the CRM.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The API answered with an error status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Bulk CSV could not be written or read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A bulk ingest job ended in a non-success state.
    #[error("bulk job {job_id} ended in state {state}: {message}")]
    BulkJob {
        job_id: String,
        state: String,
        message: String,
    },

    /// A bulk ingest job did not finish in time.
    #[error("bulk job {0} timed out")]
    Timeout(String),

    /// A payload could not be read as a record.
    #[error("invalid record: {0}")]
    Record(#[from] crmsync_types::Error),

    /// Connection settings are unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RemoteError {
    /// Returns true if the remote signalled that its request quota is spent.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            RemoteError::Api { status, message } => {
                *status == 429 || message.contains("REQUEST_LIMIT_EXCEEDED")
            }
            RemoteError::Http(e) => e.status().is_some_and(|s| s.as_u16() == 429),
            _ => false,
        }
    }
}
