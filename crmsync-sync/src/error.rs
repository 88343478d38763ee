//! Error types for sync orchestration.

use crmsync_merge::MergeError;
use crmsync_remote::RemoteError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing a tenant.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connector settings are unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Neither a token nor a login is configured.
    #[error("missing credentials")]
    MissingCredentials,

    /// Remote CRM error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Patch computation failed.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// The platform client failed.
    #[error("platform error: {0}")]
    Platform(String),

    /// The aggregator is draining for shutdown and accepts no new messages.
    #[error("exiting, not accepting messages")]
    Unavailable,

    /// A message carries neither a user nor an account, or its subject has
    /// no id.
    #[error("unknown subject type for message")]
    UnknownSubject,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// HTTP-style status for callers that answer webhooks.
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::Unavailable => 503,
            SyncError::MissingCredentials => 403,
            SyncError::UnknownSubject | SyncError::Config(_) => 400,
            SyncError::Remote(RemoteError::Api { status, .. }) => *status,
            _ => 500,
        }
    }
}
