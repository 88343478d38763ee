//! Remote connection abstraction.
//!
//! Every remote call made by the engine goes through [`RemoteConnection`].
//! The REST client, the metering wrapper and the test mock all implement it.

use crate::error::RemoteResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crmsync_types::{Patch, RecordType, RemoteRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata about one remote field, as returned by `describe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescription {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub updateable: bool,
    #[serde(default)]
    pub custom: bool,
}

/// Per-record result of an upsert call, in input order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordResult {
    /// Remote id of the written record, when known.
    pub id: Option<String>,
    pub success: bool,
    /// True when the upsert created the record.
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RecordResult {
    #[must_use]
    pub fn ok(id: impl Into<String>, created: bool) -> Self {
        Self {
            id: Some(id.into()),
            success: true,
            created,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            id: None,
            success: false,
            created: false,
            errors: vec![error.into()],
        }
    }
}

/// Remote API quota consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiUsage {
    pub used: u64,
    pub max: u64,
}

/// The write mechanism used for an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePath {
    /// One synchronous call carrying every record.
    Single,
    /// An asynchronous bulk ingest job.
    Bulk,
}

/// Operations the engine needs from the CRM.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Runs a full-text search and returns every matching record.
    async fn search(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>>;

    /// Runs a tabular query, following pagination to the end.
    async fn query(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>>;

    /// Describes the fields of a remote type.
    async fn describe(&self, record_type: &RecordType) -> RemoteResult<Vec<FieldDescription>>;

    /// Ids of records of a type changed within `[since, until]`.
    async fn updated(
        &self,
        record_type: &RecordType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RemoteResult<Vec<String>>;

    /// Upserts records in one synchronous call. Returns one result per input
    /// record, in input order.
    async fn upsert_single(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>>;

    /// Upserts records through a bulk job. Returns one result per input
    /// record, in input order.
    async fn upsert_bulk(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>>;

    /// Last API usage reported by the remote, if the transport tracks it.
    fn api_usage(&self) -> Option<ApiUsage> {
        None
    }
}

#[async_trait]
impl<C: RemoteConnection + ?Sized> RemoteConnection for Arc<C> {
    async fn search(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        (**self).search(query).await
    }

    async fn query(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        (**self).query(query).await
    }

    async fn describe(&self, record_type: &RecordType) -> RemoteResult<Vec<FieldDescription>> {
        (**self).describe(record_type).await
    }

    async fn updated(
        &self,
        record_type: &RecordType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RemoteResult<Vec<String>> {
        (**self).updated(record_type, since, until).await
    }

    async fn upsert_single(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        (**self)
            .upsert_single(record_type, records, external_id_field)
            .await
    }

    async fn upsert_bulk(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        (**self)
            .upsert_bulk(record_type, records, external_id_field)
            .await
    }

    fn api_usage(&self) -> Option<ApiUsage> {
        (**self).api_usage()
    }
}
