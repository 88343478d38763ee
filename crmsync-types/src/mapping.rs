//! Field rules and per-type field mappings.
//!
//! A [`FieldMapping`] says, for one remote type, how every remote field is
//! computed from a local record. A [`MappingSet`] groups the mappings of all
//! configured types in the order they were configured.

use crate::ids::RecordType;
use crate::path::FieldPath;
use crate::Error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How one remote field is computed from a local record.
///
/// Connector JSON accepts three shapes: a bare string (`"email"`), an object
/// with `key` (plus optional `defaultValue` and `overwrite`) and an object
/// with only `tpl`. Anything else fails to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFieldRule", into = "RawFieldRule")]
pub enum FieldRule {
    /// Copy the local value verbatim. Never overwrites a remote value.
    Direct(FieldPath),
    /// Read a dotted path, optionally falling back to a (templated) default.
    Keyed {
        path: FieldPath,
        default_value: Option<String>,
        overwrite: bool,
    },
    /// Render a `{{field}}` template against the local record, optionally
    /// falling back to a (templated) default.
    Templated {
        template: String,
        default_value: Option<String>,
        overwrite: bool,
    },
}

impl FieldRule {
    #[must_use]
    pub fn direct(path: &str) -> Self {
        Self::Direct(FieldPath::parse(path))
    }

    #[must_use]
    pub fn keyed(path: &str) -> Self {
        Self::Keyed {
            path: FieldPath::parse(path),
            default_value: None,
            overwrite: false,
        }
    }

    #[must_use]
    pub fn templated(template: impl Into<String>) -> Self {
        Self::Templated {
            template: template.into(),
            default_value: None,
            overwrite: false,
        }
    }

    /// Sets the default value. A `Direct` rule becomes `Keyed`.
    #[must_use]
    pub fn with_default(self, value: impl Into<String>) -> Self {
        let default_value = Some(value.into());
        match self {
            Self::Direct(path) => Self::Keyed {
                path,
                default_value,
                overwrite: false,
            },
            Self::Keyed {
                path, overwrite, ..
            } => Self::Keyed {
                path,
                default_value,
                overwrite,
            },
            Self::Templated {
                template,
                overwrite,
                ..
            } => Self::Templated {
                template,
                default_value,
                overwrite,
            },
        }
    }

    /// Allows the rule to replace an existing remote value.
    #[must_use]
    pub fn overwriting(self) -> Self {
        match self {
            Self::Direct(path) => Self::Keyed {
                path,
                default_value: None,
                overwrite: true,
            },
            Self::Keyed {
                path,
                default_value,
                ..
            } => Self::Keyed {
                path,
                default_value,
                overwrite: true,
            },
            Self::Templated {
                template,
                default_value,
                ..
            } => Self::Templated {
                template,
                default_value,
                overwrite: true,
            },
        }
    }

    /// Whether an existing, non-default remote value may be replaced.
    #[must_use]
    pub fn overwrite(&self) -> bool {
        match self {
            Self::Direct(_) => false,
            Self::Keyed { overwrite, .. } | Self::Templated { overwrite, .. } => *overwrite,
        }
    }

    /// The configured default value, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<&str> {
        match self {
            Self::Keyed { default_value, .. } | Self::Templated { default_value, .. } => {
                default_value.as_deref()
            }
            Self::Direct(_) => None,
        }
    }
}

/// Wire shape of a [`FieldRule`].
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawFieldRule {
    Path(String),
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(
            default,
            rename = "defaultValue",
            skip_serializing_if = "Option::is_none"
        )]
        default_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tpl: Option<String>,
        #[serde(default, deserialize_with = "nullable_bool")]
        overwrite: bool,
    },
}

fn nullable_bool<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl TryFrom<RawFieldRule> for FieldRule {
    type Error = Error;

    fn try_from(raw: RawFieldRule) -> Result<Self, Self::Error> {
        match raw {
            RawFieldRule::Path(path) if !path.is_empty() => Ok(Self::direct(&path)),
            RawFieldRule::Path(_) => Err(Error::InvalidRule("empty field path".to_string())),
            RawFieldRule::Object {
                key: Some(key),
                default_value,
                overwrite,
                ..
            } if !key.is_empty() => Ok(Self::Keyed {
                path: FieldPath::parse(&key),
                default_value: default_value.filter(|d| !d.is_empty()),
                overwrite,
            }),
            RawFieldRule::Object {
                tpl: Some(template),
                default_value,
                overwrite,
                ..
            } if !template.is_empty() => Ok(Self::Templated {
                template,
                default_value: default_value.filter(|d| !d.is_empty()),
                overwrite,
            }),
            RawFieldRule::Object { .. } => Err(Error::InvalidRule(
                "object rule needs a `key` or a `tpl`".to_string(),
            )),
        }
    }
}

impl From<FieldRule> for RawFieldRule {
    fn from(rule: FieldRule) -> Self {
        match rule {
            FieldRule::Direct(path) => Self::Path(path.into()),
            FieldRule::Keyed {
                path,
                default_value,
                overwrite,
            } => Self::Object {
                key: Some(path.into()),
                default_value,
                tpl: None,
                overwrite,
            },
            FieldRule::Templated {
                template,
                default_value,
                overwrite,
            } => Self::Object {
                key: None,
                default_value,
                tpl: Some(template),
                overwrite,
            },
        }
    }
}

/// Field rules of one remote type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    /// Remote field name -> rule, in configuration order.
    #[serde(default)]
    pub fields: IndexMap<String, FieldRule>,
    /// When set, array values are joined with this separator before
    /// comparison and output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_arrays: Option<String>,
    /// Remote fields read back by the incoming flow -> trait name override
    /// (`None` derives the trait name from the remote field).
    #[serde(default)]
    pub fetch_fields: IndexMap<String, Option<String>>,
    /// Remote fields also copied to a top-level platform attribute.
    #[serde(default)]
    pub fetch_to_top_level: IndexMap<String, Option<String>>,
}

impl FieldMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field rule.
    #[must_use]
    pub fn with_field(mut self, remote_field: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(remote_field.into(), rule);
        self
    }

    /// Joins array values with `separator`.
    #[must_use]
    pub fn with_array_separator(mut self, separator: impl Into<String>) -> Self {
        self.join_arrays = Some(separator.into());
        self
    }

    /// Adds a field to read back from the remote system.
    #[must_use]
    pub fn with_fetch_field(mut self, remote_field: impl Into<String>, trait_name: Option<&str>) -> Self {
        self.fetch_fields
            .insert(remote_field.into(), trait_name.map(str::to_string));
        self
    }

    /// Mapped remote field names, in order, empty names skipped.
    pub fn remote_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str).filter(|f| !f.is_empty())
    }

    /// Remote field names read by the incoming flow.
    pub fn fetch_field_names(&self) -> impl Iterator<Item = &str> {
        self.fetch_fields.keys().map(String::as_str)
    }
}

/// Mappings of every configured remote type, in configuration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingSet(IndexMap<RecordType, FieldMapping>);

impl MappingSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the mapping of a type.
    pub fn insert(&mut self, record_type: RecordType, mapping: FieldMapping) {
        self.0.insert(record_type, mapping);
    }

    /// Builder form of [`MappingSet::insert`].
    #[must_use]
    pub fn with(mut self, record_type: RecordType, mapping: FieldMapping) -> Self {
        self.insert(record_type, mapping);
        self
    }

    #[must_use]
    pub fn get(&self, record_type: &RecordType) -> Option<&FieldMapping> {
        self.0.get(record_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordType, &FieldMapping)> {
        self.0.iter()
    }

    pub fn types(&self) -> impl Iterator<Item = &RecordType> {
        self.0.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a set restricted to the given types, keeping this set's order.
    #[must_use]
    pub fn only(&self, types: &[RecordType]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(t, _)| types.contains(t))
                .map(|(t, m)| (t.clone(), m.clone()))
                .collect(),
        )
    }
}
