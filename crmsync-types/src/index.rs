//! Remote search results keyed by identity.

use crate::ids::RecordType;
use crate::record::RemoteRecord;
use std::collections::HashMap;

/// Identity value (email, domain or remote id) -> remote type -> record.
///
/// Built once per sync call from the merged results of every search chunk,
/// then consumed by the matcher.
#[derive(Debug, Clone, Default)]
pub struct MatchIndex {
    entries: HashMap<String, HashMap<RecordType, RemoteRecord>>,
}

impl MatchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a record under an identity, replacing an earlier record of the
    /// same type.
    pub fn insert(&mut self, identity: impl Into<String>, record: RemoteRecord) {
        self.entries
            .entry(identity.into())
            .or_default()
            .insert(record.record_type().clone(), record);
    }

    /// All matches for an identity.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&HashMap<RecordType, RemoteRecord>> {
        self.entries.get(identity)
    }

    /// The match of one type for an identity.
    #[must_use]
    pub fn get_type(&self, identity: &str, record_type: &RecordType) -> Option<&RemoteRecord> {
        self.entries.get(identity).and_then(|m| m.get(record_type))
    }

    /// Returns true if the identity matched a record of the given type.
    #[must_use]
    pub fn has_type(&self, identity: &str, record_type: &RecordType) -> bool {
        self.get_type(identity, record_type).is_some()
    }

    /// Folds another index into this one. Later records win.
    pub fn merge(&mut self, other: MatchIndex) {
        for (identity, by_type) in other.entries {
            self.entries.entry(identity).or_default().extend(by_type);
        }
    }

    /// Number of distinct identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates identities.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
