//! In-memory [`RemoteConnection`] for tests.
//!
//! Holds a small table of remote records and answers searches and queries
//! against it with a loose reading of the query strings built by
//! `crmsync_merge::query`. Every call is recorded for assertions.

use crate::connection::{FieldDescription, RecordResult, RemoteConnection, WritePath};
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crmsync_merge::query::required_field;
use crmsync_types::{Patch, RecordType, RemoteRecord};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One recorded upsert call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCall {
    pub record_type: RecordType,
    pub path: WritePath,
    pub external_id_field: String,
    pub records: Vec<Patch>,
}

#[derive(Default)]
struct MockState {
    records: Vec<RemoteRecord>,
    descriptions: HashMap<RecordType, Vec<FieldDescription>>,
    updated_ids: HashMap<RecordType, Vec<String>>,
    rejected: HashSet<String>,
    failing_operations: HashMap<&'static str, String>,
    searches: Vec<String>,
    queries: Vec<String>,
    updated_calls: Vec<(RecordType, DateTime<Utc>, DateTime<Utc>)>,
    upserts: Vec<UpsertCall>,
    next_id: usize,
}

/// Scripted remote connection.
#[derive(Default)]
pub struct MockConnection {
    state: Mutex<MockState>,
}

impl MockConnection {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a remote record.
    pub fn with_record(self, record: RemoteRecord) -> Self {
        self.state.lock().unwrap().records.push(record);
        self
    }

    /// Sets the `describe` answer for a type.
    pub fn with_description(self, record_type: RecordType, fields: Vec<FieldDescription>) -> Self {
        self.state
            .lock()
            .unwrap()
            .descriptions
            .insert(record_type, fields);
        self
    }

    /// Sets the `updated` answer for a type.
    pub fn with_updated_ids(self, record_type: RecordType, ids: Vec<String>) -> Self {
        self.state.lock().unwrap().updated_ids.insert(record_type, ids);
        self
    }

    /// Makes upserts reject the record whose identity is `identity`.
    pub fn rejecting(self, identity: impl Into<String>) -> Self {
        self.state.lock().unwrap().rejected.insert(identity.into());
        self
    }

    /// Makes every call of `operation` (`search`, `query`, `describe`,
    /// `updated`, `upsert`) fail with a 500.
    pub fn failing(self, operation: &'static str, message: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_operations
            .insert(operation, message.into());
        self
    }

    /// Search strings received so far.
    pub fn searches(&self) -> Vec<String> {
        self.state.lock().unwrap().searches.clone()
    }

    /// Query strings received so far.
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    /// `updated` calls received so far.
    pub fn updated_calls(&self) -> Vec<(RecordType, DateTime<Utc>, DateTime<Utc>)> {
        self.state.lock().unwrap().updated_calls.clone()
    }

    /// Upsert calls received so far.
    pub fn upserts(&self) -> Vec<UpsertCall> {
        self.state.lock().unwrap().upserts.clone()
    }

    fn check(&self, operation: &'static str) -> RemoteResult<()> {
        match self.state.lock().unwrap().failing_operations.get(operation) {
            Some(message) => Err(RemoteError::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn upsert(
        &self,
        path: WritePath,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        self.check("upsert")?;
        let mut state = self.state.lock().unwrap();
        state.upserts.push(UpsertCall {
            record_type: record_type.clone(),
            path,
            external_id_field: external_id_field.to_string(),
            records: records.to_vec(),
        });

        let mut results = Vec::with_capacity(records.len());
        for patch in records {
            let identity = patch.identity(external_id_field);
            if identity.as_ref().is_some_and(|i| state.rejected.contains(i)) {
                results.push(RecordResult::failed("FIELD_INTEGRITY_EXCEPTION: rejected"));
                continue;
            }
            match patch.id() {
                Some(id) => results.push(RecordResult::ok(id, false)),
                None => {
                    state.next_id += 1;
                    results.push(RecordResult::ok(format!("MOCK{:06}", state.next_id), true));
                }
            }
        }
        Ok(results)
    }
}

/// Quoted terms of `FIND {"a" OR "b"}`, unescaped.
fn search_terms(query: &str) -> Vec<String> {
    let Some(start) = query.find('{') else {
        return Vec::new();
    };
    let mut terms = Vec::new();
    let mut current: Option<String> = None;
    let mut chars = query[start + 1..].chars();
    while let Some(c) = chars.next() {
        if let Some(term) = current.as_mut() {
            match c {
                '\\' => term.extend(chars.next()),
                '"' => terms.extend(current.take()),
                _ => term.push(c),
            }
        } else if c == '"' {
            current = Some(String::new());
        } else if c == '}' {
            break;
        }
    }
    terms
}

/// Type names of a `RETURNING A(Id), B(Id)` clause.
fn returning_types(query: &str) -> Vec<RecordType> {
    let Some((_, clause)) = query.split_once("RETURNING ") else {
        return Vec::new();
    };
    clause
        .split("), ")
        .filter_map(|part| part.split('(').next())
        .map(|name| RecordType::from(name.trim()))
        .collect()
}

fn matches_term(record: &RemoteRecord, terms: &[String]) -> bool {
    record.fields().values().filter_map(Value::as_str).any(|value| {
        let value = value.to_lowercase();
        terms.iter().any(|t| value.contains(&t.to_lowercase()))
    })
}

/// Type after `FROM` and the quoted ids of an `Id IN (...)` filter.
fn query_target(query: &str) -> (Option<RecordType>, Option<Vec<String>>) {
    let record_type = query
        .split_once(" FROM ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(RecordType::from);
    let ids = query.split_once("Id IN (").map(|(_, rest)| {
        rest.split(')')
            .next()
            .unwrap_or_default()
            .split(',')
            .map(|id| id.trim().trim_matches('\'').to_string())
            .collect()
    });
    (record_type, ids)
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn search(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        self.check("search")?;
        let mut state = self.state.lock().unwrap();
        state.searches.push(query.to_string());

        let terms = search_terms(query);
        let types = returning_types(query);
        Ok(state
            .records
            .iter()
            .filter(|r| types.contains(r.record_type()) && matches_term(r, &terms))
            .cloned()
            .collect())
    }

    async fn query(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        self.check("query")?;
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.to_string());

        let (Some(record_type), ids) = query_target(query) else {
            return Ok(Vec::new());
        };
        let required = required_field(&record_type);
        Ok(state
            .records
            .iter()
            .filter(|r| r.record_type() == &record_type)
            .filter(|r| r.get(required).is_some_and(|v| !v.is_null()))
            .filter(|r| match (&ids, r.id()) {
                (Some(ids), Some(id)) => ids.iter().any(|i| i == id),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect())
    }

    async fn describe(&self, record_type: &RecordType) -> RemoteResult<Vec<FieldDescription>> {
        self.check("describe")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .descriptions
            .get(record_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn updated(
        &self,
        record_type: &RecordType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RemoteResult<Vec<String>> {
        self.check("updated")?;
        let mut state = self.state.lock().unwrap();
        state.updated_calls.push((record_type.clone(), since, until));
        Ok(state.updated_ids.get(record_type).cloned().unwrap_or_default())
    }

    async fn upsert_single(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        self.upsert(WritePath::Single, record_type, records, external_id_field)
    }

    async fn upsert_bulk(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        self.upsert(WritePath::Bulk, record_type, records, external_id_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_search_terms_and_types() {
        let query = r#"FIND {"a\-b@x.io" OR "hull.io"} IN EMAIL FIELDS RETURNING Lead(Id,Email), Contact(Id)"#;
        assert_eq!(search_terms(query), vec!["a-b@x.io", "hull.io"]);
        assert_eq!(
            returning_types(query),
            vec![RecordType::Lead, RecordType::Contact]
        );
    }

    #[test]
    fn reads_query_target() {
        let (record_type, ids) =
            query_target("SELECT Id,Email FROM Lead WHERE Id IN ('1','2') AND Email != null");
        assert_eq!(record_type, Some(RecordType::Lead));
        assert_eq!(ids, Some(vec!["1".to_string(), "2".to_string()]));

        let (record_type, ids) = query_target("SELECT Id FROM Account WHERE Website != null");
        assert_eq!(record_type, Some(RecordType::Account));
        assert_eq!(ids, None);
    }
}
