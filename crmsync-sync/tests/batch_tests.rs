mod common;

use common::*;
use crmsync_remote::mock::MockConnection;
use crmsync_sync::platform::mock::MockPlatform;
use crmsync_sync::{
    AgentSink, BatchConfig, BatchHandler, BatchStats, FlushOutcome, FlushSummary,
    HandlerRegistry, SyncError,
};
use crmsync_types::{ChangeMessage, RecordType, SubjectKind, TenantId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn batch_config(max_batch_size: usize) -> BatchConfig {
    BatchConfig {
        max_batch_size,
        throttle: Duration::from_secs(30),
    }
}

fn handler(sink: &Arc<RecordingSink>, max_batch_size: usize) -> Arc<BatchHandler> {
    Arc::new(BatchHandler::new(
        tenant(),
        batch_config(max_batch_size),
        sink.clone(),
    ))
}

// ── Throttled flush ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn messages_are_flushed_after_the_throttle() {
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&sink, 99);

    for i in 0..3 {
        handler
            .add(user_message(&i.to_string(), &format!("u{i}@x.io")))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(sink.calls().is_empty());
    assert_eq!(handler.stats().users.pending, 3);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, SubjectKind::User);
    assert_eq!(calls[0].tenant, tenant());
    assert_eq!(calls[0].subject_ids(), vec!["0", "1", "2"]);

    assert_eq!(
        handler.stats().users,
        BatchStats {
            added: 3,
            flushes: 1,
            flushing: 0,
            succeeded: 1,
            failed: 0,
            pending: 0,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn later_message_for_same_subject_wins() {
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&sink, 99);

    handler.add(user_message("1", "old@x.io")).await.unwrap();
    handler.add(user_message("2", "two@x.io")).await.unwrap();
    handler.add(user_message("1", "new@x.io")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].subject_ids(), vec!["1", "2"]);
    let emails: Vec<_> = calls[0]
        .messages
        .iter()
        .filter_map(|m| m.user.as_ref().and_then(|u| u.email()).map(str::to_string))
        .collect();
    assert_eq!(emails, vec!["new@x.io", "two@x.io"]);
    assert_eq!(handler.stats().users.added, 3);
}

#[tokio::test(start_paused = true)]
async fn one_timer_per_window() {
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&sink, 99);

    handler.add(user_message("1", "a@x.io")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    handler.add(user_message("2", "b@x.io")).await.unwrap();

    // The first timer fires 30s after the first message and takes both.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(sink.calls().len(), 1);
    assert_eq!(sink.calls()[0].subject_ids(), vec!["1", "2"]);

    // A message after the flush starts a new window.
    handler.add(user_message("3", "c@x.io")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(sink.calls().len(), 2);
    assert_eq!(sink.calls()[1].subject_ids(), vec!["3"]);
}

// ── Size trigger ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn exceeding_max_batch_size_flushes_immediately() {
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&sink, 2);

    handler.add(user_message("1", "a@x.io")).await.unwrap();
    handler.add(user_message("2", "b@x.io")).await.unwrap();
    assert!(sink.calls().is_empty());

    handler.add(user_message("3", "c@x.io")).await.unwrap();
    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].subject_ids(), vec!["1", "2", "3"]);

    // The pending timer finds nothing left to send.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(sink.calls().len(), 1);
    assert_eq!(handler.stats().users.flushes, 1);
}

#[tokio::test(start_paused = true)]
async fn users_and_accounts_are_batched_separately() {
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&sink, 99);

    handler.add(user_message("u1", "a@x.io")).await.unwrap();
    handler.add(account_message("a1", "x.io")).await.unwrap();
    handler.add(account_message("a2", "y.io")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;

    let mut calls = sink.calls();
    calls.sort_by_key(|c| c.kind == SubjectKind::Account);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].kind, SubjectKind::User);
    assert_eq!(calls[0].subject_ids(), vec!["u1"]);
    assert_eq!(calls[1].kind, SubjectKind::Account);
    assert_eq!(calls[1].subject_ids(), vec!["a1", "a2"]);

    let stats = handler.stats();
    assert_eq!(stats.users.added, 1);
    assert_eq!(stats.accounts.added, 2);
}

#[tokio::test]
async fn message_without_subject_is_rejected() {
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&sink, 99);

    let err = handler.add(ChangeMessage::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownSubject));
    assert_eq!(err.status_code(), 400);

    let no_id = ChangeMessage::user(local(json!({"email": "a@x.io"})));
    let err = handler.add(no_id).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownSubject));
    assert_eq!(handler.stats().users.added, 0);
}

// ── Flush outcomes ──────────────────────────────────────────────

#[tokio::test]
async fn flushing_nothing_makes_no_call() {
    let sink = Arc::new(RecordingSink::default());
    let handler = handler(&sink, 99);

    assert_eq!(handler.flush().await, FlushSummary::default());
    assert!(sink.calls().is_empty());
    assert_eq!(handler.stats().users.flushes, 0);
}

#[tokio::test]
async fn sink_failure_is_counted() {
    let sink = Arc::new(RecordingSink::failing());
    let handler = handler(&sink, 99);

    handler.add(user_message("1", "a@x.io")).await.unwrap();
    handler.add(user_message("2", "b@x.io")).await.unwrap();

    assert_eq!(handler.flush_users().await, FlushOutcome::Failed(2));
    let stats = handler.stats().users;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.flushing, 0);
}

// ── Registry and shutdown ───────────────────────────────────────

#[tokio::test]
async fn registry_reuses_handlers_per_tenant() {
    let sink = Arc::new(RecordingSink::default());
    let registry = HandlerRegistry::new(batch_config(99), sink);

    let a = registry.handler(&TenantId::new("a"));
    let again = registry.handler(&TenantId::new("a"));
    let b = registry.handler(&TenantId::new("b"));

    assert!(Arc::ptr_eq(&a, &again));
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(registry.stats().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn exit_drains_every_tenant_then_rejects() {
    let sink = Arc::new(RecordingSink::default());
    let registry = HandlerRegistry::new(batch_config(99), sink.clone());

    registry
        .handle(&TenantId::new("a"), user_message("1", "a@x.io"))
        .await
        .unwrap();
    registry
        .handle(&TenantId::new("a"), account_message("acc", "x.io"))
        .await
        .unwrap();
    registry
        .handle(&TenantId::new("b"), user_message("2", "b@x.io"))
        .await
        .unwrap();

    let mut drained = registry.exit().await;
    drained.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(
        drained,
        vec![
            (
                TenantId::new("a"),
                FlushSummary {
                    users: FlushOutcome::Succeeded(1),
                    accounts: FlushOutcome::Succeeded(1),
                }
            ),
            (
                TenantId::new("b"),
                FlushSummary {
                    users: FlushOutcome::Succeeded(1),
                    accounts: FlushOutcome::Empty,
                }
            ),
        ]
    );
    assert_eq!(sink.calls().len(), 3);
    assert!(registry.is_exiting());

    let err = registry
        .handle(&TenantId::new("a"), user_message("3", "c@x.io"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unavailable));
    assert_eq!(err.status_code(), 503);

    // Timers scheduled before exit find empty maps.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(sink.calls().len(), 3);
}

#[tokio::test]
async fn handler_rejects_messages_after_exit() {
    let sink = Arc::new(RecordingSink::default());
    let registry = HandlerRegistry::new(batch_config(99), sink.clone());
    let existing = registry.handler(&tenant());
    existing.add(user_message("1", "a@x.io")).await.unwrap();

    registry.exit().await;

    let err = existing
        .add(user_message("2", "late@x.io"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unavailable));
    assert_eq!(existing.stats().users.pending, 0);

    let created_late = registry.handler(&TenantId::new("new"));
    let err = created_late
        .add(account_message("acc", "x.io"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unavailable));
    assert_eq!(created_late.stats().accounts.pending, 0);

    assert_eq!(sink.calls().len(), 1);
    assert_eq!(sink.calls()[0].subject_ids(), vec!["1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_accepted_message_is_drained_on_exit() {
    let sink = Arc::new(RecordingSink::default());
    let registry = Arc::new(HandlerRegistry::new(batch_config(99), sink.clone()));

    let senders: Vec<_> = (0..200)
        .map(|i| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let id = i.to_string();
                registry
                    .handle(&tenant(), user_message(&id, &format!("u{i}@x.io")))
                    .await
                    .map(|()| id)
            })
        })
        .collect();
    tokio::task::yield_now().await;
    registry.exit().await;

    let mut accepted = Vec::new();
    for sender in senders {
        match sender.await.unwrap() {
            Ok(id) => accepted.push(id),
            Err(e) => assert!(matches!(e, SyncError::Unavailable)),
        }
    }

    let mut delivered: Vec<String> = sink
        .calls()
        .iter()
        .flat_map(|call| call.subject_ids())
        .collect();
    accepted.sort();
    delivered.sort();
    assert_eq!(delivered, accepted);
    assert_eq!(registry.handler(&tenant()).stats().users.pending, 0);
}

#[tokio::test]
async fn second_exit_returns_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let registry = HandlerRegistry::new(batch_config(99), sink.clone());
    registry
        .handle(&TenantId::new("a"), user_message("1", "a@x.io"))
        .await
        .unwrap();

    assert_eq!(registry.exit().await.len(), 1);
    assert!(registry.exit().await.is_empty());
    assert_eq!(sink.calls().len(), 1);
}

// ── Agent-backed sink ───────────────────────────────────────────

#[tokio::test]
async fn agent_sink_pushes_batches_through_the_agent() {
    let connection = Arc::new(MockConnection::new());
    let platform = Arc::new(MockPlatform::default());
    let sink = Arc::new(AgentSink::new());
    sink.register(agent(&settings(), &connection, &platform));

    let registry = HandlerRegistry::new(batch_config(99), sink);
    let message = ChangeMessage::user(local(json!({
        "id": "1",
        "email": "bob@dufion.com",
        "last_name": "Dufion"
    })))
    .with_segments(["seg-users"]);
    registry.handle(&tenant(), message).await.unwrap();

    let drained = registry.exit().await;
    assert_eq!(drained[0].1.users, FlushOutcome::Succeeded(1));

    let upserts = connection.upserts();
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].record_type, RecordType::Lead);
}

#[tokio::test]
async fn agent_sink_fails_for_unknown_tenant() {
    let sink = Arc::new(AgentSink::new());
    let registry = HandlerRegistry::new(batch_config(99), sink);
    registry
        .handle(&TenantId::new("nobody"), user_message("1", "a@x.io"))
        .await
        .unwrap();

    let drained = registry.exit().await;
    assert_eq!(drained[0].1.users, FlushOutcome::Failed(1));
}
