//! Field merge engine.
//!
//! Computes, for one local record and at most one matched remote record, the
//! fields that must change remotely.

use crate::error::{MergeError, MergeResult};
use crate::template::TemplateRenderer;
use crmsync_types::{FieldMapping, FieldRule, LocalRecord, Patch, RemoteRecord};
use serde_json::Value;
use tracing::trace;

/// A remote value is absent when missing or `null`. Only absent values may
/// be filled by a rule that does not overwrite.
fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Remote values a rule's default may replace: absent, `""`, `0` or `false`.
fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// A computed value is empty when nil, the empty string or an empty array.
fn is_nil_or_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        _ => false,
    }
}

fn join_array(items: &[Value], separator: &str) -> Value {
    let parts: Vec<String> = items
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Value::String(parts.join(separator))
}

/// Computes minimal field-level patches.
#[derive(Default)]
pub struct FieldMerger {
    templates: TemplateRenderer,
}

impl FieldMerger {
    /// Creates a merger with its own template renderer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the merger's template renderer.
    #[must_use]
    pub fn templates(&self) -> &TemplateRenderer {
        &self.templates
    }

    /// Computes the patch to apply to `remote` so it reflects `local`.
    ///
    /// `seed` fields are always part of a returned patch but do not count as
    /// a change: `Ok(None)` means no mapped field needs writing.
    pub fn merge(
        &self,
        local: &LocalRecord,
        remote: Option<&RemoteRecord>,
        mapping: &FieldMapping,
        seed: Patch,
    ) -> MergeResult<Option<Patch>> {
        let mut patch = seed;
        let mut changed = 0usize;

        for (field, rule) in &mapping.fields {
            let current = remote.and_then(|r| r.get(field));
            let default_value = rule.default_value();

            let is_default =
                matches!((current, default_value), (Some(Value::String(c)), Some(d)) if c == d);
            if !(is_absent(current) || is_default || rule.overwrite()) {
                trace!(field = %field, "remote value kept");
                continue;
            }

            let mut value = self.candidate(field, rule, local)?;

            if is_nil_or_empty(value.as_ref()) {
                if let Some(default_value) = default_value {
                    if !(is_falsy(current) || is_default) {
                        trace!(field = %field, "empty value, remote value kept");
                        continue;
                    }
                    value = Some(Value::String(
                        self.templates.render_or_literal(default_value, local),
                    ));
                }
            }

            if let (Some(separator), Some(Value::Array(items))) = (&mapping.join_arrays, &value) {
                value = Some(join_array(items, separator));
            }

            let Some(value) = value.filter(|v| !v.is_null()) else {
                continue;
            };
            if current == Some(&value) {
                continue;
            }

            if patch.insert(field.clone(), value).is_none() {
                changed += 1;
            }
        }

        Ok((changed > 0).then_some(patch))
    }

    /// The value a rule computes from the local record, before defaults.
    fn candidate(
        &self,
        field: &str,
        rule: &FieldRule,
        local: &LocalRecord,
    ) -> MergeResult<Option<Value>> {
        match rule {
            FieldRule::Direct(path) | FieldRule::Keyed { path, .. } => {
                let lookup = local.lookup(path);
                if lookup.is_missing() && path.is_nested() {
                    // `account.city` style keys also resolve against the
                    // record's own top level.
                    return Ok(path
                        .last_segment()
                        .and_then(|last| local.get(last))
                        .cloned());
                }
                Ok(lookup.cloned())
            }
            FieldRule::Templated { template, .. } => self
                .templates
                .render(template, local)
                .map(|rendered| Some(Value::String(rendered)))
                .map_err(|message| MergeError::Template {
                    field: field.to_string(),
                    message,
                }),
        }
    }
}
