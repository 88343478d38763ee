//! Identifier types used throughout the sync engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Identifier of one configured connector instance (one customer's
/// integration). Every batch handler and every settings lookup is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant ID from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A remote object type.
///
/// `Lead` and `Contact` hold people, `Account` holds organizations. Any other
/// name is carried verbatim as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    Lead,
    Contact,
    Account,
    Custom(String),
}

impl RecordType {
    /// Returns the remote type name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Lead => "Lead",
            Self::Contact => "Contact",
            Self::Account => "Account",
            Self::Custom(name) => name,
        }
    }

    /// Returns true for the person-style types (`Lead`, `Contact`).
    #[must_use]
    pub fn is_person(&self) -> bool {
        matches!(self, Self::Lead | Self::Contact)
    }

    /// Returns true for the organization-style type (`Account`).
    #[must_use]
    pub fn is_organization(&self) -> bool {
        matches!(self, Self::Account)
    }

    /// External id field used by upserts when the caller does not pick one.
    #[must_use]
    pub fn default_external_id_field(&self) -> &'static str {
        match self {
            Self::Account => "Id",
            _ => "Email",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for RecordType {
    fn from(s: &str) -> Self {
        match s {
            "Lead" => Self::Lead,
            "Contact" => Self::Contact,
            "Account" => Self::Account,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl Serialize for RecordType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for RecordType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}
