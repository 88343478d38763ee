//! Core type definitions for the CRM sync engine.
//!
//! This crate defines the plain data shared by every other crate:
//! - Tenant and remote record-type identifiers
//! - Dotted field paths with an explicit missing/null distinction
//! - Local records, remote records and the patches computed between them
//! - The identity index built from remote search results
//! - Field rules and per-type field mappings
//! - Change messages fed into the batch aggregator
//!
//! Nothing here performs I/O.

mod ids;
mod index;
mod mapping;
mod message;
mod path;
mod record;

pub use ids::{RecordType, TenantId};
pub use index::MatchIndex;
pub use mapping::{FieldMapping, FieldRule, MappingSet};
pub use message::{ChangeMessage, Segment, SubjectKind};
pub use path::{FieldPath, Lookup};
pub use record::{Fields, LocalRecord, Patch, RemoteRecord};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record was not a JSON object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A remote record carries no type.
    #[error("remote record has no `attributes.type`")]
    MissingRecordType,

    /// A field rule has none of the accepted shapes.
    #[error("unrecognized field rule: {0}")]
    InvalidRule(String),
}

/// Returns the JSON kind name of a value, for error messages.
pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
