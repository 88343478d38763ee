//! Batch aggregator with throttled flush and shutdown drain.
//!
//! Each tenant gets a [`BatchHandler`] with one pending map for users and
//! one for accounts. Messages are keyed by subject id, so a later message
//! for the same subject replaces the earlier one. A map is flushed either
//! immediately when it grows past `max_batch_size`, or by a trailing-edge
//! timer `throttle` after the first message since the last timed flush.
//!
//! The [`HandlerRegistry`] owns the handlers and the exit latch. Once
//! [`HandlerRegistry::exit`] has been called no message is accepted and every
//! tenant's pending messages are flushed one last time.

use crate::agent::Agent;
use crate::config::BatchConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use crmsync_types::{ChangeMessage, SubjectKind, TenantId};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// Receives flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn sync_users(&self, tenant: &TenantId, messages: Vec<ChangeMessage>) -> SyncResult<()>;

    async fn sync_accounts(
        &self,
        tenant: &TenantId,
        messages: Vec<ChangeMessage>,
    ) -> SyncResult<()>;
}

/// Sink that hands batches to the tenant's [`Agent`].
pub struct AgentSink {
    agents: RwLock<HashMap<TenantId, Arc<Agent>>>,
    apply_filters: bool,
}

impl Default for AgentSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentSink {
    /// Sink that restricts batches to the configured segments.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            apply_filters: true,
        }
    }

    /// Sink that synchronizes every subject regardless of segments.
    pub fn unfiltered() -> Self {
        Self {
            apply_filters: false,
            ..Self::new()
        }
    }

    /// Registers the agent for its tenant, replacing any previous one.
    pub fn register(&self, agent: Agent) -> Arc<Agent> {
        let agent = Arc::new(agent);
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent.tenant().clone(), Arc::clone(&agent));
        agent
    }

    pub fn agent(&self, tenant: &TenantId) -> SyncResult<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("no agent registered for tenant {tenant}")))
    }
}

#[async_trait]
impl BatchSink for AgentSink {
    async fn sync_users(&self, tenant: &TenantId, messages: Vec<ChangeMessage>) -> SyncResult<()> {
        let agent = self.agent(tenant)?;
        agent.sync_users(&messages, self.apply_filters).await?;
        Ok(())
    }

    async fn sync_accounts(
        &self,
        tenant: &TenantId,
        messages: Vec<ChangeMessage>,
    ) -> SyncResult<()> {
        let agent = self.agent(tenant)?;
        agent.sync_accounts(&messages, self.apply_filters).await?;
        Ok(())
    }
}

/// Counters of one pending map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Messages accepted.
    pub added: u64,
    /// Non-empty snapshots handed to the sink.
    pub flushes: u64,
    /// Flushes currently awaiting the sink.
    pub flushing: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Messages waiting for the next flush.
    pub pending: u64,
}

/// Counters of one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    pub users: BatchStats,
    pub accounts: BatchStats,
}

/// What a flush of one pending map did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    #[default]
    Empty,
    /// The sink accepted this many messages.
    Succeeded(usize),
    /// The sink failed on this many messages.
    Failed(usize),
}

/// Flush outcomes of one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub users: FlushOutcome,
    pub accounts: FlushOutcome,
}

#[derive(Debug, Default)]
struct Lane {
    pending: IndexMap<String, ChangeMessage>,
    scheduled: bool,
    stats: BatchStats,
}

#[derive(Debug, Default)]
struct Lanes {
    users: Lane,
    accounts: Lane,
}

impl Lanes {
    fn get_mut(&mut self, kind: SubjectKind) -> &mut Lane {
        match kind {
            SubjectKind::User => &mut self.users,
            SubjectKind::Account => &mut self.accounts,
        }
    }
}

enum Trigger {
    Immediate,
    Schedule,
    None,
}

/// Aggregates one tenant's change messages into batches.
pub struct BatchHandler {
    tenant: TenantId,
    config: BatchConfig,
    sink: Arc<dyn BatchSink>,
    lanes: Mutex<Lanes>,
    exiting: Arc<AtomicBool>,
}

impl BatchHandler {
    pub fn new(tenant: TenantId, config: BatchConfig, sink: Arc<dyn BatchSink>) -> Self {
        Self::with_exit_latch(tenant, config, sink, Arc::new(AtomicBool::new(false)))
    }

    fn with_exit_latch(
        tenant: TenantId,
        config: BatchConfig,
        sink: Arc<dyn BatchSink>,
        exiting: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tenant,
            config,
            sink,
            lanes: Mutex::new(Lanes::default()),
            exiting,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a message.
    ///
    /// When the pending map grows past `max_batch_size` it is flushed before
    /// this returns; otherwise a trailing flush is scheduled unless one
    /// already is. Rejected with [`SyncError::Unavailable`] once the owning
    /// registry is exiting.
    pub async fn add(self: &Arc<Self>, message: ChangeMessage) -> SyncResult<()> {
        let (kind, _) = message.subject().ok_or(SyncError::UnknownSubject)?;
        let id = message.subject_id().ok_or(SyncError::UnknownSubject)?;

        let trigger = {
            let mut lanes = self.lock();
            // Checked under the lane lock so a drain never misses a message
            // it did not reject.
            if self.exiting.load(Ordering::SeqCst) {
                warn!(tenant = %self.tenant, "message rejected while exiting");
                return Err(SyncError::Unavailable);
            }
            let lane = lanes.get_mut(kind);
            lane.pending.insert(id, message);
            lane.stats.added += 1;
            lane.stats.pending = lane.pending.len() as u64;

            if lane.pending.len() > self.config.max_batch_size {
                Trigger::Immediate
            } else if !lane.scheduled {
                lane.scheduled = true;
                Trigger::Schedule
            } else {
                Trigger::None
            }
        };

        match trigger {
            Trigger::Immediate => {
                self.flush_kind(kind).await;
            }
            Trigger::Schedule => {
                let handler = Arc::clone(self);
                let throttle = self.config.throttle;
                tokio::spawn(async move {
                    tokio::time::sleep(throttle).await;
                    handler.lock().get_mut(kind).scheduled = false;
                    handler.flush_kind(kind).await;
                });
            }
            Trigger::None => {}
        }
        Ok(())
    }

    pub async fn flush_users(&self) -> FlushOutcome {
        self.flush_kind(SubjectKind::User).await
    }

    pub async fn flush_accounts(&self) -> FlushOutcome {
        self.flush_kind(SubjectKind::Account).await
    }

    /// Flushes both pending maps concurrently.
    pub async fn flush(&self) -> FlushSummary {
        let (users, accounts) = tokio::join!(self.flush_users(), self.flush_accounts());
        FlushSummary { users, accounts }
    }

    async fn flush_kind(&self, kind: SubjectKind) -> FlushOutcome {
        let messages: Vec<ChangeMessage> = {
            let mut lanes = self.lock();
            let lane = lanes.get_mut(kind);
            let snapshot = std::mem::take(&mut lane.pending);
            lane.stats.pending = 0;
            if !snapshot.is_empty() {
                lane.stats.flushes += 1;
                lane.stats.flushing += 1;
            }
            snapshot.into_values().collect()
        };
        if messages.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = messages.len();
        debug!(tenant = %self.tenant, kind = kind.as_str(), count, "flushing");
        let result = match kind {
            SubjectKind::User => self.sink.sync_users(&self.tenant, messages).await,
            SubjectKind::Account => self.sink.sync_accounts(&self.tenant, messages).await,
        };

        let mut lanes = self.lock();
        let stats = &mut lanes.get_mut(kind).stats;
        stats.flushing -= 1;
        match result {
            Ok(()) => {
                stats.succeeded += 1;
                FlushOutcome::Succeeded(count)
            }
            Err(e) => {
                stats.failed += 1;
                error!(tenant = %self.tenant, kind = kind.as_str(), count, error = %e, "flush failed");
                FlushOutcome::Failed(count)
            }
        }
    }

    pub fn stats(&self) -> HandlerStats {
        let lanes = self.lock();
        HandlerStats {
            users: lanes.users.stats,
            accounts: lanes.accounts.stats,
        }
    }

    /// Logs the current counters at debug level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        debug!(tenant = %self.tenant, users = ?stats.users, accounts = ?stats.accounts, "batch stats");
    }
}

/// Tenant handlers sharing one sink, plus the shutdown latch.
pub struct HandlerRegistry {
    config: BatchConfig,
    sink: Arc<dyn BatchSink>,
    handlers: Mutex<IndexMap<TenantId, Arc<BatchHandler>>>,
    exiting: Arc<AtomicBool>,
}

impl HandlerRegistry {
    pub fn new(config: BatchConfig, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            config,
            sink,
            handlers: Mutex::new(IndexMap::new()),
            exiting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The tenant's handler, created on first use.
    pub fn handler(&self, tenant: &TenantId) -> Arc<BatchHandler> {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let handler = handlers.entry(tenant.clone()).or_insert_with(|| {
            debug!(tenant = %tenant, "creating batch handler");
            Arc::new(BatchHandler::with_exit_latch(
                tenant.clone(),
                self.config.clone(),
                Arc::clone(&self.sink),
                Arc::clone(&self.exiting),
            ))
        });
        Arc::clone(handler)
    }

    /// Queues a message for a tenant. Rejected with
    /// [`SyncError::Unavailable`] once [`exit`](Self::exit) was called.
    pub async fn handle(&self, tenant: &TenantId, message: ChangeMessage) -> SyncResult<()> {
        self.handler(tenant).add(message).await
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Stops accepting messages and flushes every tenant concurrently.
    ///
    /// Only the first call flushes; later calls return no results.
    pub async fn exit(&self) -> Vec<(TenantId, FlushSummary)> {
        if self.exiting.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        let handlers: Vec<Arc<BatchHandler>> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        info!(tenants = handlers.len(), "draining batch handlers");

        join_all(handlers.into_iter().map(|handler| async move {
            let summary = handler.flush().await;
            (handler.tenant().clone(), summary)
        }))
        .await
    }

    /// Counters of every tenant, in creation order.
    pub fn stats(&self) -> Vec<(TenantId, HandlerStats)> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(tenant, handler)| (tenant.clone(), handler.stats()))
            .collect()
    }
}
