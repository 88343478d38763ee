//! Remote query construction.
//!
//! Builds full-text search strings of the form
//! `FIND {"a" OR "b"} IN EMAIL FIELDS RETURNING Lead(Id,Email)` and tabular
//! queries of the form `SELECT Id,Email FROM Lead WHERE Email != null`.

use crmsync_types::{MappingSet, RecordType};

/// Characters with meaning in the remote search grammar.
pub const RESERVED_CHARACTERS: &[char] = &[
    '?', '&', '|', '!', '{', '}', '[', ']', '(', ')', '^', '~', '*', ':', '+', '-', '"', '\'',
];

/// Search terms shorter than this are dropped.
pub const MIN_SEARCH_TERM_LEN: usize = 4;

/// Values per search or hydration call.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Splits `values` into owned chunks of at most `size` items. A zero size is
/// treated as one.
pub fn chunked<T: Clone>(values: &[T], size: usize) -> Vec<Vec<T>> {
    values.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

/// Backslash-prefixes every reserved character.
#[must_use]
pub fn escape_search_term(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if RESERVED_CHARACTERS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Quoted, escaped search terms, with too-short values removed.
pub fn search_terms<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .map(AsRef::as_ref)
        .filter(|v| v.chars().count() >= MIN_SEARCH_TERM_LEN)
        .map(|v| format!("\"{}\"", escape_search_term(v)))
        .collect()
}

/// `Type(Id,f1,f2), Type2(Id)` for every mapped type, in mapping order.
#[must_use]
pub fn returning_clause(mappings: &MappingSet) -> String {
    mappings
        .iter()
        .map(|(record_type, mapping)| {
            let fields = dedup(std::iter::once("Id").chain(mapping.remote_fields()));
            format!("{record_type}({})", fields.join(","))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds a search for `values` in the remote search group `field`
/// (`EMAIL`, `NAME`, ...).
#[must_use]
pub fn search_query<S: AsRef<str>>(field: &str, values: &[S], mappings: &MappingSet) -> String {
    format!(
        "FIND {{{}}} IN {field} FIELDS RETURNING {}",
        search_terms(values).join(" OR "),
        returning_clause(mappings)
    )
}

/// Fields always selected for a type, whatever was requested.
#[must_use]
pub fn default_fields(record_type: &RecordType) -> &'static [&'static str] {
    match record_type {
        RecordType::Account => &["Id", "Website"],
        RecordType::Contact => &["Id", "Email", "FirstName", "LastName", "Account.Website"],
        RecordType::Lead => &["Id", "Email", "FirstName", "LastName"],
        RecordType::Custom(_) => &["Id"],
    }
}

/// Field that must be non-null for a row to be synchronized. Rows without it
/// cannot be tied back to a local identity.
#[must_use]
pub fn required_field(record_type: &RecordType) -> &'static str {
    match record_type {
        RecordType::Account => "Website",
        _ => "Email",
    }
}

/// Requested fields followed by the type's defaults, deduplicated.
pub fn select_fields<S: AsRef<str>>(record_type: &RecordType, requested: &[S]) -> Vec<String> {
    dedup(
        requested
            .iter()
            .map(AsRef::as_ref)
            .chain(default_fields(record_type).iter().copied()),
    )
}

/// `SELECT ... FROM <Type> WHERE Id IN ('a','b') AND <required> != null`.
#[must_use]
pub fn records_by_ids_query<F: AsRef<str>, I: AsRef<str>>(
    record_type: &RecordType,
    fields: &[F],
    ids: &[I],
) -> String {
    let ids = ids
        .iter()
        .map(|id| format!("'{}'", escape_soql_literal(id.as_ref())))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "SELECT {} FROM {record_type} WHERE Id IN ({ids}) AND {} != null",
        select_fields(record_type, fields).join(","),
        required_field(record_type)
    )
}

/// `SELECT ... FROM <Type> WHERE <required> != null`.
#[must_use]
pub fn full_scan_query<F: AsRef<str>>(record_type: &RecordType, fields: &[F]) -> String {
    format!(
        "SELECT {} FROM {record_type} WHERE {} != null",
        select_fields(record_type, fields).join(","),
        required_field(record_type)
    )
}

fn escape_soql_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn dedup<'a>(fields: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for field in fields.filter(|f| !f.is_empty()) {
        if !out.iter().any(|seen| seen == field) {
            out.push(field.to_string());
        }
    }
    out
}
