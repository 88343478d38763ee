mod common;

use common::email_patches;
use crmsync_remote::mock::MockConnection;
use crmsync_remote::{DispatchConfig, UpsertDispatcher, WritePath};
use crmsync_types::{Patch, RecordType};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn dispatcher(mock: &Arc<MockConnection>) -> UpsertDispatcher {
    UpsertDispatcher::new(mock.clone())
}

// ── Path selection ──────────────────────────────────────────────

#[tokio::test]
async fn ninety_nine_records_use_the_single_path() {
    let mock = Arc::new(MockConnection::new());
    let outcome = dispatcher(&mock)
        .upsert(&RecordType::Lead, &email_patches(99), "Email")
        .await
        .unwrap();

    assert_eq!(outcome.path, WritePath::Single);
    assert_eq!(outcome.succeeded(), 99);
    let calls = mock.upserts();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, WritePath::Single);
    assert_eq!(calls[0].records.len(), 99);
}

#[tokio::test]
async fn one_hundred_records_use_the_bulk_path() {
    let mock = Arc::new(MockConnection::new());
    let outcome = dispatcher(&mock)
        .upsert(&RecordType::Lead, &email_patches(100), "Email")
        .await
        .unwrap();

    assert_eq!(outcome.path, WritePath::Bulk);
    assert_eq!(outcome.entries.len(), 100);
    assert_eq!(mock.upserts()[0].path, WritePath::Bulk);
}

#[tokio::test]
async fn limit_is_configurable() {
    let mock = Arc::new(MockConnection::new());
    let dispatcher = UpsertDispatcher::with_config(
        mock.clone(),
        DispatchConfig {
            single_write_limit: 2,
        },
    );
    assert_eq!(dispatcher.select_path(2), WritePath::Single);
    assert_eq!(dispatcher.select_path(3), WritePath::Bulk);
}

#[tokio::test]
async fn empty_batch_makes_no_call() {
    let mock = Arc::new(MockConnection::new());
    let outcome = dispatcher(&mock)
        .upsert(&RecordType::Contact, &[], "Email")
        .await
        .unwrap();

    assert!(outcome.is_empty());
    assert!(mock.upserts().is_empty());
}

// ── Per-record accounting ───────────────────────────────────────

#[tokio::test]
async fn one_rejected_record_does_not_fail_the_batch() {
    let mock = Arc::new(MockConnection::new().rejecting("user42@example.com"));
    let dispatcher = dispatcher(&mock);
    let outcome = dispatcher
        .upsert(&RecordType::Lead, &email_patches(150), "Email")
        .await
        .unwrap();

    assert_eq!(outcome.path, WritePath::Bulk);
    assert_eq!(outcome.succeeded(), 149);
    assert_eq!(outcome.failed(), 1);

    let failure = outcome.failures().next().unwrap();
    assert_eq!(failure.identity.as_deref(), Some("user42@example.com"));
    assert!(!failure.errors.is_empty());

    let metrics = dispatcher.metrics();
    assert_eq!(metrics.record_errors(), 1);
    assert_eq!(metrics.records_written(), 149);
    assert_eq!(metrics.bulk_calls(), 1);
    assert_eq!(mock.upserts().len(), 1, "failures are not retried");
}

#[tokio::test]
async fn identity_falls_back_to_id() {
    let mock = Arc::new(MockConnection::new());
    let patches = vec![
        Patch::new().with("Id", "001A").with("Name", "Hull"),
        Patch::new().with("Website", "hull.io").with("Name", "Hull"),
    ];
    let outcome = dispatcher(&mock)
        .upsert(&RecordType::Account, &patches, "Id")
        .await
        .unwrap();

    assert_eq!(outcome.entries[0].identity.as_deref(), Some("001A"));
    assert_eq!(outcome.entries[0].remote_id.as_deref(), Some("001A"));
    assert!(!outcome.entries[0].created);
    assert_eq!(outcome.entries[1].identity, None);
    assert!(outcome.entries[1].created);
}

#[tokio::test]
async fn whole_call_failure_is_an_error() {
    let mock = Arc::new(MockConnection::new().failing("upsert", "boom"));
    let dispatcher = dispatcher(&mock);
    let err = dispatcher
        .upsert(&RecordType::Lead, &email_patches(3), "Email")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("boom"));
    assert_eq!(dispatcher.metrics().record_errors(), 0);
}
