//! Local records, remote records and patches.

use crate::ids::RecordType;
use crate::path::{FieldPath, Lookup};
use crate::{kind_of, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON object holding record fields, in insertion order.
pub type Fields = serde_json::Map<String, Value>;

/// Renders a scalar value as an identity string. Objects and arrays have no
/// identity form.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A profile or account from the customer-data platform.
///
/// Identity lives in `id` plus `email` (users) or `domain` (accounts). The
/// record is never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalRecord(Fields);

impl LocalRecord {
    /// Wraps a field map.
    #[must_use]
    pub fn new(fields: Fields) -> Self {
        Self(fields)
    }

    /// Builds a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(Error::NotAnObject(kind_of(&other))),
        }
    }

    /// Returns the underlying fields.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    /// Returns a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a top-level field if it is a string.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Resolves a dotted path.
    pub fn lookup(&self, path: &FieldPath) -> Lookup<'_> {
        path.resolve(&self.0)
    }

    /// The platform id, as a string.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.0.get("id").and_then(scalar_string)
    }

    /// The user's email.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.str_field("email")
    }

    /// The account's domain.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.str_field("domain")
    }

    /// Returns a copy of the record without the given top-level key.
    #[must_use]
    pub fn without(&self, key: &str) -> Self {
        let mut fields = self.0.clone();
        fields.shift_remove(key);
        Self(fields)
    }
}

impl From<Fields> for LocalRecord {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for LocalRecord {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

/// A record as returned by the CRM.
///
/// Remote payloads carry their type under `attributes.type`; that envelope is
/// stripped on parse so `fields` holds only real columns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct RemoteRecord {
    record_type: RecordType,
    fields: Fields,
}

impl RemoteRecord {
    /// Creates a remote record from its parts.
    #[must_use]
    pub fn new(record_type: RecordType, fields: Fields) -> Self {
        Self {
            record_type,
            fields,
        }
    }

    /// Parses a remote payload whose type lives in `attributes.type`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::NotAnObject(kind_of(&value)));
        };
        let record_type = fields
            .shift_remove("attributes")
            .as_ref()
            .and_then(|attrs| attrs.get("type"))
            .and_then(Value::as_str)
            .map(RecordType::from)
            .ok_or(Error::MissingRecordType)?;
        Ok(Self {
            record_type,
            fields,
        })
    }

    /// Parses a remote payload of a known type. An `attributes` envelope, if
    /// present, is dropped.
    pub fn from_value_as(record_type: RecordType, value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::NotAnObject(kind_of(&value)));
        };
        fields.shift_remove("attributes");
        Ok(Self {
            record_type,
            fields,
        })
    }

    /// The remote type of this record.
    #[must_use]
    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    /// The remote `Id`, when the record exists remotely.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.str_field("Id")
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns a field value if it is a string.
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns all fields.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Consumes the record, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

impl TryFrom<Value> for RemoteRecord {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

/// Field-level delta to write to one remote record.
///
/// Carries `Id` when it targets an existing record; creates omit it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Fields);

impl Patch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Builder form of [`Patch::insert`].
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.0
    }

    #[must_use]
    pub fn into_fields(self) -> Fields {
        self.0
    }

    /// The remote `Id` this patch updates, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("Id").and_then(Value::as_str)
    }

    /// Natural key of the patch under the given external id field, falling
    /// back to `Id`.
    #[must_use]
    pub fn identity(&self, external_id_field: &str) -> Option<String> {
        self.0
            .get(external_id_field)
            .and_then(scalar_string)
            .or_else(|| self.id().map(str::to_string))
    }
}

impl From<Fields> for Patch {
    fn from(fields: Fields) -> Self {
        Self(fields)
    }
}
