//! Record matcher and type resolver.
//!
//! Given the remote search results of a batch, decides which remote type
//! each local record writes to and collects the patches that actually
//! change something.

use crate::error::MergeResult;
use crate::merge::FieldMerger;
use crmsync_types::{FieldMapping, LocalRecord, MappingSet, MatchIndex, Patch, RecordType};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

/// Returns the first pattern contained in `website`, compared
/// case-insensitively.
///
/// Pattern order is significant: the first match wins even when a later
/// pattern would match more precisely.
pub fn match_domain_pattern<'a, S: AsRef<str>>(website: &str, patterns: &'a [S]) -> Option<&'a S> {
    let website = website.to_lowercase();
    patterns.iter().find(|pattern| {
        let pattern = pattern.as_ref();
        !pattern.is_empty() && website.contains(&pattern.to_lowercase())
    })
}

/// Patches grouped by target remote type, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPatches {
    by_type: IndexMap<RecordType, Vec<Patch>>,
}

impl ResolvedPatches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a patch for a type.
    pub fn push(&mut self, record_type: RecordType, patch: Patch) {
        self.by_type.entry(record_type).or_default().push(patch);
    }

    /// Patches for a type, empty if none.
    #[must_use]
    pub fn get(&self, record_type: &RecordType) -> &[Patch] {
        self.by_type.get(record_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordType, &Vec<Patch>)> {
        self.by_type.iter()
    }

    /// Removes and returns the patches of a type.
    pub fn take(&mut self, record_type: &RecordType) -> Vec<Patch> {
        self.by_type.shift_remove(record_type).unwrap_or_default()
    }

    /// Total number of patches across types.
    #[must_use]
    pub fn total(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// How local accounts are matched to remote accounts.
#[derive(Debug, Clone)]
pub struct AccountMatchOptions {
    /// Local attribute holding the remote account id, tried before the
    /// domain.
    pub external_id_attribute: String,
}

impl Default for AccountMatchOptions {
    fn default() -> Self {
        Self {
            external_id_attribute: "salesforce/id".to_string(),
        }
    }
}

/// Resolves target types and computes patches for a batch.
#[derive(Default)]
pub struct RecordMatcher {
    merger: FieldMerger,
}

impl RecordMatcher {
    #[must_use]
    pub fn new(merger: FieldMerger) -> Self {
        Self { merger }
    }

    #[must_use]
    pub fn merger(&self) -> &FieldMerger {
        &self.merger
    }

    /// Resolves person records.
    ///
    /// A record writes to `Contact` when its email already matched a Contact,
    /// otherwise to `Lead`. Records without an email, without a mapping for
    /// their target type, or without a real change are dropped.
    pub fn resolve_users(
        &self,
        index: &MatchIndex,
        users: &[LocalRecord],
        mappings: &MappingSet,
    ) -> MergeResult<ResolvedPatches> {
        let mut resolved = ResolvedPatches::new();

        for user in users {
            let Some(email) = user.email() else {
                debug!(id = ?user.id(), "user has no email, skipped");
                continue;
            };

            let target = if index.has_type(email, &RecordType::Contact) {
                RecordType::Contact
            } else {
                RecordType::Lead
            };
            let Some(mapping) = mappings.get(&target) else {
                debug!(%email, record_type = %target, "no mapping for target type");
                continue;
            };

            let remote = index.get_type(email, &target);
            let seed = Patch::new().with("Email", email);
            if let Some(patch) = self.merger.merge(user, remote, mapping, seed)? {
                resolved.push(target, patch);
            }
        }

        Ok(resolved)
    }

    /// Resolves organization records against `Account`.
    ///
    /// The remote account is looked up by the configured external id
    /// attribute first, then by domain. A matched account seeds the patch
    /// with its `Id` and `Website`; an unmatched one with the local domain.
    pub fn resolve_accounts(
        &self,
        index: &MatchIndex,
        accounts: &[LocalRecord],
        mapping: &FieldMapping,
        options: &AccountMatchOptions,
    ) -> MergeResult<ResolvedPatches> {
        let mut resolved = ResolvedPatches::new();

        for account in accounts {
            let by_external_id = account
                .str_field(&options.external_id_attribute)
                .and_then(|id| index.get_type(id, &RecordType::Account));
            let remote = by_external_id.or_else(|| {
                account
                    .domain()
                    .and_then(|domain| index.get_type(domain, &RecordType::Account))
            });

            let mut seed = Patch::new();
            match remote {
                Some(found) => {
                    if let Some(id) = found.id() {
                        seed.insert("Id", Value::String(id.to_string()));
                    }
                    if let Some(website) = found.get("Website").filter(|w| !w.is_null()) {
                        seed.insert("Website", website.clone());
                    }
                }
                None => {
                    if let Some(domain) = account.domain() {
                        seed.insert("Website", Value::String(domain.to_string()));
                    }
                }
            }

            let input = account.without("domain");
            if let Some(patch) = self.merger.merge(&input, remote, mapping, seed)? {
                resolved.push(RecordType::Account, patch);
            }
        }

        Ok(resolved)
    }
}
