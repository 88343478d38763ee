//! Projection of remote records into platform traits.
//!
//! Used by the incoming flow: a fetched Lead becomes traits like
//! `salesforce_lead/first_name`, plus optional top-level attributes written
//! only when the platform has no value yet.

use crmsync_types::{FieldMapping, Fields, RecordType, RemoteRecord};
use serde_json::json;

/// Trait namespace for a remote type: `salesforce` for accounts,
/// `salesforce_<type>` otherwise.
#[must_use]
pub fn trait_source(record_type: &RecordType) -> String {
    match record_type {
        RecordType::Account => "salesforce".to_string(),
        other => format!("salesforce_{}", other.name().to_lowercase()),
    }
}

/// `FirstName` -> `first_name`.
#[must_use]
pub fn to_underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    match out.strip_prefix('_') {
        Some(stripped) => stripped.to_string(),
        None => out,
    }
}

/// Full trait name for a remote field.
#[must_use]
pub fn trait_name(source: &str, trait_override: Option<&str>, remote_field: &str) -> String {
    match trait_override {
        Some(name) => format!("{source}/{name}"),
        None => format!("{source}/{}", to_underscore(remote_field)),
    }
}

/// Builds the traits to write for a fetched record. Only fields present on
/// the record are projected.
#[must_use]
pub fn record_traits(record: &RemoteRecord, mapping: &FieldMapping) -> Fields {
    let source = trait_source(record.record_type());
    let mut traits = Fields::new();

    for (remote_field, trait_override) in &mapping.fetch_fields {
        if let Some(value) = record.get(remote_field) {
            traits.insert(
                trait_name(&source, trait_override.as_deref(), remote_field),
                value.clone(),
            );
        }
    }

    for (remote_field, top_level) in &mapping.fetch_to_top_level {
        let (Some(top_level), Some(value)) = (top_level, record.get(remote_field)) else {
            continue;
        };
        traits.insert(
            top_level.clone(),
            json!({ "value": value, "operation": "setIfNull" }),
        );
    }

    traits
}
