//! Error types for the merge layer.

use thiserror::Error;

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Errors that can occur while computing patches.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A templated field rule could not be rendered.
    #[error("template error in field `{field}`: {message}")]
    Template { field: String, message: String },

    /// A record could not be read.
    #[error(transparent)]
    Record(#[from] crmsync_types::Error),
}
