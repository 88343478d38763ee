//! Request accounting around any [`RemoteConnection`].

use crate::connection::{ApiUsage, FieldDescription, RecordResult, RemoteConnection};
use crate::error::RemoteResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crmsync_types::{Patch, RecordType, RemoteRecord, TenantId};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Counters shared by a metered connection and its observers.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    rate_limited: AtomicU64,
    api_used: AtomicU64,
    api_max: AtomicU64,
}

/// Point-in-time copy of [`ConnectionMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub rate_limited: u64,
    pub api_used: u64,
    pub api_max: u64,
}

impl ConnectionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            api_used: self.api_used.load(Ordering::Relaxed),
            api_max: self.api_max.load(Ordering::Relaxed),
        }
    }
}

/// Wraps a connection, counting requests and errors and tracking the last
/// API usage the remote reported.
pub struct MeteredConnection<C> {
    inner: C,
    metrics: Arc<ConnectionMetrics>,
    tenant: Option<TenantId>,
}

impl<C: RemoteConnection> MeteredConnection<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            metrics: Arc::new(ConnectionMetrics::default()),
            tenant: None,
        }
    }

    /// Tags log lines with the tenant.
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn observe<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);
        let result = call.await;

        if let Some(usage) = self.inner.api_usage() {
            self.metrics.api_used.store(usage.used, Ordering::Relaxed);
            self.metrics.api_max.store(usage.max, Ordering::Relaxed);
        }

        match &result {
            Ok(_) => debug!(tenant = ?self.tenant, operation, "remote call ok"),
            Err(e) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                if e.is_rate_limited() {
                    self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
                }
                warn!(tenant = ?self.tenant, operation, error = %e, "remote call failed");
            }
        }
        result
    }
}

#[async_trait]
impl<C: RemoteConnection> RemoteConnection for MeteredConnection<C> {
    async fn search(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        self.observe("search", self.inner.search(query)).await
    }

    async fn query(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        self.observe("query", self.inner.query(query)).await
    }

    async fn describe(&self, record_type: &RecordType) -> RemoteResult<Vec<FieldDescription>> {
        self.observe("describe", self.inner.describe(record_type))
            .await
    }

    async fn updated(
        &self,
        record_type: &RecordType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RemoteResult<Vec<String>> {
        self.observe("updated", self.inner.updated(record_type, since, until))
            .await
    }

    async fn upsert_single(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        self.observe(
            "upsert_single",
            self.inner
                .upsert_single(record_type, records, external_id_field),
        )
        .await
    }

    async fn upsert_bulk(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        self.observe(
            "upsert_bulk",
            self.inner.upsert_bulk(record_type, records, external_id_field),
        )
        .await
    }

    fn api_usage(&self) -> Option<ApiUsage> {
        self.inner.api_usage()
    }
}
