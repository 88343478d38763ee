#![allow(dead_code)]

use crmsync_types::{FieldMapping, FieldRule, MappingSet, Patch, RecordType, RemoteRecord};
use serde_json::{json, Value};

pub fn remote(value: Value) -> RemoteRecord {
    RemoteRecord::from_value(value).unwrap()
}

pub fn lead(id: &str, email: &str) -> RemoteRecord {
    remote(json!({"attributes": {"type": "Lead"}, "Id": id, "Email": email}))
}

pub fn contact(id: &str, email: &str) -> RemoteRecord {
    remote(json!({"attributes": {"type": "Contact"}, "Id": id, "Email": email}))
}

pub fn account(id: &str, website: &str) -> RemoteRecord {
    remote(json!({"attributes": {"type": "Account"}, "Id": id, "Website": website, "Name": id}))
}

pub fn email_patches(count: usize) -> Vec<Patch> {
    (0..count)
        .map(|i| Patch::new().with("Email", format!("user{i}@example.com")).with("LastName", "Doe"))
        .collect()
}

pub fn person_mappings() -> MappingSet {
    MappingSet::new()
        .with(
            RecordType::Lead,
            FieldMapping::new().with_field("LastName", FieldRule::direct("last_name")),
        )
        .with(
            RecordType::Contact,
            FieldMapping::new().with_field("LastName", FieldRule::direct("last_name")),
        )
}

pub fn account_mappings() -> MappingSet {
    MappingSet::new().with(
        RecordType::Account,
        FieldMapping::new().with_field("Name", FieldRule::direct("name")),
    )
}
