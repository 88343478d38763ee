//! Adaptive upsert dispatcher.
//!
//! Picks the write path from the batch size and turns the remote's
//! per-record results into an [`UpsertOutcome`]. A failing record never
//! fails the others; failures are counted, logged and not retried.

use crate::connection::{RecordResult, RemoteConnection, WritePath};
use crate::error::RemoteResult;
use crmsync_types::{Patch, RecordType};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Largest batch written through the single path.
pub const DEFAULT_SINGLE_WRITE_LIMIT: usize = 99;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Batches larger than this go through the bulk path.
    pub single_write_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            single_write_limit: DEFAULT_SINGLE_WRITE_LIMIT,
        }
    }
}

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    record_errors: AtomicU64,
    records_written: AtomicU64,
    single_calls: AtomicU64,
    bulk_calls: AtomicU64,
}

impl DispatchMetrics {
    /// Records rejected by the remote.
    pub fn record_errors(&self) -> u64 {
        self.record_errors.load(Ordering::Relaxed)
    }

    /// Records accepted by the remote.
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn single_calls(&self) -> u64 {
        self.single_calls.load(Ordering::Relaxed)
    }

    pub fn bulk_calls(&self) -> u64 {
        self.bulk_calls.load(Ordering::Relaxed)
    }
}

/// Result of writing one patch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertEntry {
    /// Value of the external id field, or `Id` when absent.
    pub identity: Option<String>,
    pub success: bool,
    pub remote_id: Option<String>,
    pub created: bool,
    pub errors: Vec<String>,
}

/// Result of one upsert call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertOutcome {
    pub record_type: RecordType,
    pub path: WritePath,
    pub entries: Vec<UpsertEntry>,
}

impl UpsertOutcome {
    fn empty(record_type: RecordType, path: WritePath) -> Self {
        Self {
            record_type,
            path,
            entries: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.success).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UpsertEntry> {
        self.entries.iter().filter(|e| !e.success)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes patches through the cheapest viable path.
pub struct UpsertDispatcher {
    connection: Arc<dyn RemoteConnection>,
    config: DispatchConfig,
    metrics: Arc<DispatchMetrics>,
}

impl UpsertDispatcher {
    pub fn new(connection: Arc<dyn RemoteConnection>) -> Self {
        Self::with_config(connection, DispatchConfig::default())
    }

    pub fn with_config(connection: Arc<dyn RemoteConnection>, config: DispatchConfig) -> Self {
        Self {
            connection,
            config,
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Write path for a batch of `count` records.
    pub fn select_path(&self, count: usize) -> WritePath {
        if count > self.config.single_write_limit {
            WritePath::Bulk
        } else {
            WritePath::Single
        }
    }

    /// Upserts `patches` as `record_type`, matching on `external_id_field`.
    ///
    /// Returns `Err` only when the call as a whole fails. Results are
    /// attributed by position; a patch the remote reported nothing for is
    /// counted as failed.
    pub async fn upsert(
        &self,
        record_type: &RecordType,
        patches: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<UpsertOutcome> {
        let path = self.select_path(patches.len());
        if patches.is_empty() {
            return Ok(UpsertOutcome::empty(record_type.clone(), path));
        }

        debug!(
            record_type = %record_type,
            records = patches.len(),
            ?path,
            "upserting"
        );

        let results = match path {
            WritePath::Single => {
                self.metrics.single_calls.fetch_add(1, Ordering::Relaxed);
                self.connection
                    .upsert_single(record_type, patches, external_id_field)
                    .await?
            }
            WritePath::Bulk => {
                self.metrics.bulk_calls.fetch_add(1, Ordering::Relaxed);
                self.connection
                    .upsert_bulk(record_type, patches, external_id_field)
                    .await?
            }
        };

        let mut results = results.into_iter();
        let entries: Vec<UpsertEntry> = patches
            .iter()
            .map(|patch| {
                let result = results
                    .next()
                    .unwrap_or_else(|| RecordResult::failed("no result returned"));
                self.entry(record_type, patch, external_id_field, result)
            })
            .collect();

        let outcome = UpsertOutcome {
            record_type: record_type.clone(),
            path,
            entries,
        };
        info!(
            record_type = %record_type,
            ?path,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "upsert done"
        );
        Ok(outcome)
    }

    fn entry(
        &self,
        record_type: &RecordType,
        patch: &Patch,
        external_id_field: &str,
        result: RecordResult,
    ) -> UpsertEntry {
        let identity = patch.identity(external_id_field);
        if result.success {
            self.metrics.records_written.fetch_add(1, Ordering::Relaxed);
            debug!(
                record_type = %record_type,
                identity = ?identity,
                remote_id = ?result.id,
                created = result.created,
                "record written"
            );
        } else {
            self.metrics.record_errors.fetch_add(1, Ordering::Relaxed);
            error!(
                record_type = %record_type,
                identity = ?identity,
                errors = ?result.errors,
                "record rejected"
            );
        }

        UpsertEntry {
            identity,
            success: result.success,
            remote_id: result.id,
            created: result.created,
            errors: result.errors,
        }
    }
}
