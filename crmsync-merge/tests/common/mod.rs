//! Shared fixtures for the merge tests.

#![allow(dead_code)]

use crmsync_types::{FieldMapping, FieldRule, LocalRecord, MappingSet, RecordType, RemoteRecord};
use serde_json::{json, Value};

pub fn local(value: Value) -> LocalRecord {
    LocalRecord::from_value(value).unwrap()
}

pub fn remote(value: Value) -> RemoteRecord {
    RemoteRecord::from_value(value).unwrap()
}

pub fn lead_mapping() -> FieldMapping {
    FieldMapping::new()
        .with_field("FirstName", FieldRule::keyed("first_name").with_default("[Unknown]"))
        .with_field("LastName", FieldRule::keyed("last_name").with_default("[Unknown]").overwriting())
        .with_field("Email", FieldRule::direct("email"))
        .with_field("Company", FieldRule::keyed("traits_company").with_default("[Unknown]"))
        .with_field(
            "City",
            FieldRule::keyed("city").with_default("City of {{last_name}}").overwriting(),
        )
        .with_field("Foo", FieldRule::templated("Hello({{id}})"))
        .with_field("Zero", FieldRule::keyed("zero"))
}

pub fn contact_mapping() -> FieldMapping {
    FieldMapping::new()
        .with_field("FirstName", FieldRule::keyed("first_name"))
        .with_field("LastName", FieldRule::keyed("last_name"))
        .with_field("Email", FieldRule::direct("email"))
}

pub fn account_mapping() -> FieldMapping {
    FieldMapping::new()
        .with_field("Name", FieldRule::keyed("name").with_default("[Unknown]"))
        .with_field("Website", FieldRule::direct("domain"))
        .with_field("City", FieldRule::keyed("account.city").overwriting())
        .with_field("Zero", FieldRule::keyed("zero"))
        .with_array_separator(";")
}

pub fn mappings() -> MappingSet {
    MappingSet::new()
        .with(RecordType::Lead, lead_mapping())
        .with(RecordType::Contact, contact_mapping())
        .with(RecordType::Account, account_mapping())
}

pub fn bob() -> LocalRecord {
    local(json!({
        "id": "123",
        "email": "bob@bob.com",
        "first_name": "Bob",
        "last_name": "Dufion",
        "zero": 0
    }))
}

pub fn bob_lead() -> RemoteRecord {
    remote(json!({
        "attributes": {"type": "Lead"},
        "Id": "456",
        "Email": "bob@bob.com",
        "FirstName": "Jean Michel",
        "LastName": "Dugommier"
    }))
}

pub fn hull_account() -> LocalRecord {
    local(json!({"id": "1234", "name": "Hull", "domain": "hull.io", "zero": 0}))
}

pub fn hull_sf_account() -> RemoteRecord {
    remote(json!({
        "attributes": {"type": "Account"},
        "Id": "3412",
        "Name": "Hull",
        "Website": "http://www.hull.io"
    }))
}
