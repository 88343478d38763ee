//! Sync orchestration for the CRM connector.
//!
//! - [`config`]: per-tenant connector settings and process-level batch knobs
//! - [`Agent`]: the per-tenant pipeline in both directions
//! - [`batch`]: per-tenant aggregation of change messages with throttled
//!   flush and a shutdown drain
//! - [`status`]: configuration health check
//! - [`platform`]: the customer-data platform client seam
//!
//! # Example
//!
//! ```no_run
//! use crmsync_sync::{AgentSink, BatchConfig, HandlerRegistry};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let sink = Arc::new(AgentSink::new());
//! let registry = HandlerRegistry::new(BatchConfig::from_env(), sink);
//! // ... feed messages with `registry.handle(&tenant, message)` ...
//! let drained = registry.exit().await;
//! # let _ = drained;
//! # }
//! ```

pub mod agent;
pub mod batch;
pub mod config;
mod error;
pub mod platform;
pub mod status;

pub use agent::{Agent, FetchReport, SyncReport};
pub use batch::{
    AgentSink, BatchHandler, BatchSink, BatchStats, FlushOutcome, FlushSummary, HandlerRegistry,
    HandlerStats,
};
pub use config::{BatchConfig, ConnectorSettings, Credentials, MappingEntry, SyncConfig, TenantSettings};
pub use error::{SyncError, SyncResult};
pub use platform::{AccountIdentity, PlatformClient, UserIdentity};
pub use status::{Status, StatusReport, status_check, status_check_with_connection};
