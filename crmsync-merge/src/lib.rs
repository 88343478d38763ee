//! Pure reconciliation logic for the CRM sync engine.
//!
//! Nothing in this crate performs I/O:
//!
//! - [`query`] builds the remote search and tabular query strings
//! - [`FieldMerger`] computes the minimal patch between a local record and
//!   its remote match
//! - [`matcher`] decides which remote type each local record writes to and
//!   groups the resulting patches
//! - [`traits`] projects remote records back into platform traits
//!
//! The merge obeys one stabilization property: applying a patch to the
//! remote record and merging again yields no patch.

mod error;
mod merge;
pub mod matcher;
pub mod query;
mod template;
pub mod traits;

pub use error::{MergeError, MergeResult};
pub use matcher::{match_domain_pattern, AccountMatchOptions, RecordMatcher, ResolvedPatches};
pub use merge::FieldMerger;
pub use template::TemplateRenderer;
