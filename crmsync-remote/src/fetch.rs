//! Incremental fetch window and full scans.

use crate::connection::{FieldDescription, RemoteConnection};
use crate::error::RemoteResult;
use chrono::{DateTime, Duration, Utc};
use crmsync_merge::query::{self, DEFAULT_CHUNK_SIZE};
use crmsync_types::{RecordType, RemoteRecord};
use futures::future::try_join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Time range of an incremental fetch, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// The hour ending at `now`.
    pub fn last_hour(now: DateTime<Utc>) -> Self {
        Self::new(now - Duration::hours(1), now)
    }

    /// Window with optional overrides; missing ends default to the last hour
    /// before now.
    pub fn with_overrides(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        let until = until.unwrap_or_else(Utc::now);
        Self::new(since.unwrap_or(until - Duration::hours(1)), until)
    }
}

impl Default for FetchWindow {
    fn default() -> Self {
        Self::last_hour(Utc::now())
    }
}

/// Fetch tuning.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Ids per hydration query.
    pub chunk_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Loads remote records changed in a window, or all of them.
pub struct RemoteFetcher {
    connection: Arc<dyn RemoteConnection>,
    config: FetchConfig,
    updated_records: AtomicU64,
}

impl RemoteFetcher {
    pub fn new(connection: Arc<dyn RemoteConnection>) -> Self {
        Self::with_config(connection, FetchConfig::default())
    }

    pub fn with_config(connection: Arc<dyn RemoteConnection>, config: FetchConfig) -> Self {
        Self {
            connection,
            config,
            updated_records: AtomicU64::new(0),
        }
    }

    /// Records hydrated by incremental fetches so far.
    pub fn updated_records(&self) -> u64 {
        self.updated_records.load(Ordering::Relaxed)
    }

    /// Field names to select: `fields` when given, otherwise every field the
    /// remote describes for the type.
    async fn resolve_fields(
        &self,
        record_type: &RecordType,
        fields: &[String],
    ) -> RemoteResult<Vec<String>> {
        if !fields.is_empty() {
            return Ok(fields.to_vec());
        }
        let described = self.connection.describe(record_type).await?;
        Ok(described.into_iter().map(|f| f.name).collect())
    }

    /// Fetches the records of `record_type` changed within `window`.
    ///
    /// Changed ids are hydrated in concurrent chunks; the first failing chunk
    /// fails the fetch. No hydration call is made when nothing changed.
    pub async fn fetch_updated(
        &self,
        record_type: &RecordType,
        fields: &[String],
        window: FetchWindow,
    ) -> RemoteResult<Vec<RemoteRecord>> {
        let ids = self
            .connection
            .updated(record_type, window.since, window.until)
            .await?;
        debug!(record_type = %record_type, changed = ids.len(), since = %window.since, "updated ids");
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let fields = self.resolve_fields(record_type, fields).await?;
        let hydrations = query::chunked(&ids, self.config.chunk_size)
            .into_iter()
            .map(|chunk| {
                let soql = query::records_by_ids_query(record_type, &fields, &chunk);
                let connection = Arc::clone(&self.connection);
                async move { connection.query(&soql).await }
            })
            .collect::<Vec<_>>();

        let records: Vec<RemoteRecord> = try_join_all(hydrations)
            .await?
            .into_iter()
            .flatten()
            .collect();

        self.updated_records
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        info!(record_type = %record_type, fetched = records.len(), "incremental fetch done");
        Ok(records)
    }

    /// Fetches every record of `record_type` carrying its required field.
    pub async fn fetch_all(
        &self,
        record_type: &RecordType,
        fields: &[String],
    ) -> RemoteResult<Vec<RemoteRecord>> {
        let fields = self.resolve_fields(record_type, fields).await?;
        let records = self
            .connection
            .query(&query::full_scan_query(record_type, &fields))
            .await?;
        info!(record_type = %record_type, fetched = records.len(), "full scan done");
        Ok(records)
    }

    /// Field descriptions of a type keyed by field name, in remote order.
    pub async fn field_descriptions(
        &self,
        record_type: &RecordType,
    ) -> RemoteResult<IndexMap<String, FieldDescription>> {
        Ok(self
            .connection
            .describe(record_type)
            .await?
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect())
    }
}
