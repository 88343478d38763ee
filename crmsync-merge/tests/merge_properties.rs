//! Property-based tests for the merge engine.
//!
//! - Protection: a present, non-default remote value is never replaced by a
//!   rule that does not overwrite.
//! - Stabilization: applying a patch and merging again yields no patch.

use crmsync_merge::FieldMerger;
use crmsync_types::{FieldMapping, FieldRule, LocalRecord, Patch, RecordType, RemoteRecord};
use proptest::prelude::*;
use serde_json::{Map, Value};

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        "[a-zA-Z ]{0,12}".prop_map(Value::String),
        (0i64..1000).prop_map(Value::from),
        prop::collection::vec("[a-z]{1,5}", 0..3)
            .prop_map(|items| Value::Array(items.into_iter().map(Value::String).collect())),
    ]
}

fn rule_strategy() -> impl Strategy<Value = FieldRule> {
    let key = "k[0-3]";
    prop_oneof![
        key.prop_map(|k| FieldRule::direct(&k)),
        (key, prop::option::of("[A-Z]{1,6}"), any::<bool>()).prop_map(|(k, default, overwrite)| {
            let mut rule = FieldRule::keyed(&k);
            if let Some(d) = default {
                rule = rule.with_default(d);
            }
            if overwrite { rule.overwriting() } else { rule }
        }),
        (key, prop::option::of("[A-Z]{1,6}"), any::<bool>()).prop_map(|(k, default, overwrite)| {
            let mut rule = FieldRule::templated(format!("{{{{{k}}}}}"));
            if let Some(d) = default {
                rule = rule.with_default(d);
            }
            if overwrite { rule.overwriting() } else { rule }
        }),
    ]
}

fn mapping_strategy() -> impl Strategy<Value = FieldMapping> {
    (
        prop::collection::vec(rule_strategy(), 1..5),
        any::<bool>(),
    )
        .prop_map(|(rules, join)| {
            let mut mapping = FieldMapping::new();
            for (i, rule) in rules.into_iter().enumerate() {
                mapping = mapping.with_field(format!("F{i}"), rule);
            }
            if join {
                mapping = mapping.with_array_separator(";");
            }
            mapping
        })
}

fn fields_strategy(prefix: &'static str) -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::vec(prop::option::of(value_strategy()), 4).prop_map(move |values| {
        values
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (format!("{prefix}{i}"), v)))
            .collect()
    })
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn protected_values_are_never_replaced(
        mapping in mapping_strategy(),
        local_fields in fields_strategy("k"),
        remote_fields in fields_strategy("F"),
    ) {
        let local = LocalRecord::new(local_fields);
        let remote = RemoteRecord::new(RecordType::Lead, remote_fields);
        let merger = FieldMerger::new();

        if let Some(patch) = merger.merge(&local, Some(&remote), &mapping, Patch::new()).unwrap() {
            for (field, rule) in &mapping.fields {
                let current = remote.get(field);
                let present = !matches!(current, None | Some(Value::Null));
                let is_default = match (current, rule.default_value()) {
                    (Some(Value::String(c)), Some(d)) => c == d,
                    _ => false,
                };
                if present && !is_default && !rule.overwrite() {
                    prop_assert!(!patch.contains(field), "{field} replaced: {patch:?}");
                }
            }
        }
    }

    #[test]
    fn merge_stabilizes_after_apply(
        mapping in mapping_strategy(),
        local_fields in fields_strategy("k"),
        remote_fields in fields_strategy("F"),
    ) {
        let local = LocalRecord::new(local_fields);
        let merger = FieldMerger::new();
        let remote = RemoteRecord::new(RecordType::Contact, remote_fields);

        if let Some(patch) = merger.merge(&local, Some(&remote), &mapping, Patch::new()).unwrap() {
            let mut applied = remote.into_fields();
            for (field, value) in patch.into_fields() {
                applied.insert(field, value);
            }
            let applied = RemoteRecord::new(RecordType::Contact, applied);
            let second = merger.merge(&local, Some(&applied), &mapping, Patch::new()).unwrap();
            prop_assert!(second.is_none(), "second merge produced {second:?}");
        }
    }
}
