//! Remote CRM access for the sync engine.
//!
//! Everything that talks to the CRM goes through the [`RemoteConnection`]
//! trait:
//!
//! - [`RestConnection`] maps it onto the REST, composite and bulk APIs
//! - [`MeteredConnection`] wraps any connection with request accounting
//! - [`mock::MockConnection`] answers from memory in tests
//!
//! On top of a connection sit the [`RemoteSearcher`] (identity search into a
//! `MatchIndex`), the [`UpsertDispatcher`] (single vs bulk writes) and the
//! [`RemoteFetcher`] (incremental fetch window and full scans).

mod connection;
pub mod dispatcher;
mod error;
pub mod fetch;
mod metered;
pub mod mock;
pub mod rest;
pub mod search;

pub use connection::{ApiUsage, FieldDescription, RecordResult, RemoteConnection, WritePath};
pub use dispatcher::{DispatchConfig, UpsertDispatcher, UpsertEntry, UpsertOutcome};
pub use error::{RemoteError, RemoteResult};
pub use fetch::{FetchConfig, FetchWindow, RemoteFetcher};
pub use metered::{ConnectionMetrics, MeteredConnection, MetricsSnapshot};
pub use rest::{RestConfig, RestConnection};
pub use search::{RemoteSearcher, SearchConfig};
