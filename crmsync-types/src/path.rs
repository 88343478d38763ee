//! Dotted field paths over loosely-typed records.
//!
//! A path such as `account.address.city` walks nested JSON objects. Resolution
//! distinguishes a key that is absent from a key that is present but `null`.

use crate::record::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A parsed dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

/// Outcome of resolving a [`FieldPath`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// Some segment of the path does not exist.
    Missing,
    /// The path exists and holds `null`.
    Null,
    /// The path exists and holds a value.
    Value(&'a Value),
}

impl FieldPath {
    /// Parses a dotted path. Empty segments are ignored, so `a..b` is `a.b`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    /// Returns the path as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true when the path has more than one segment.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Returns the final segment.
    #[must_use]
    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Resolves the path against a record.
    pub fn resolve<'a>(&self, root: &'a Fields) -> Lookup<'a> {
        let Some((first, rest)) = self.segments.split_first() else {
            return Lookup::Missing;
        };
        let Some(mut current) = root.get(first) else {
            return Lookup::Missing;
        };
        for segment in rest {
            match current {
                Value::Object(map) => match map.get(segment) {
                    Some(next) => current = next,
                    None => return Lookup::Missing,
                },
                _ => return Lookup::Missing,
            }
        }
        Lookup::from_value(current)
    }
}

impl From<String> for FieldPath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for FieldPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl<'a> Lookup<'a> {
    fn from_value(value: &'a Value) -> Self {
        if value.is_null() {
            Self::Null
        } else {
            Self::Value(value)
        }
    }

    /// Returns true if the path was absent.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Returns true if the path was absent or held `null`.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Missing | Self::Null)
    }

    /// Returns the value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns an owned copy of the value, if any.
    #[must_use]
    pub fn cloned(&self) -> Option<Value> {
        self.value().cloned()
    }
}
