#![allow(dead_code)]

use async_trait::async_trait;
use crmsync_remote::mock::MockConnection;
use crmsync_sync::platform::mock::MockPlatform;
use crmsync_sync::{
    Agent, BatchSink, ConnectorSettings, MappingEntry, SyncConfig, SyncError, SyncResult,
    TenantSettings,
};
use crmsync_types::{ChangeMessage, LocalRecord, RemoteRecord, SubjectKind, TenantId};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Routes `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn tenant() -> TenantId {
    TenantId::new("tenant-1")
}

pub fn local(value: Value) -> LocalRecord {
    LocalRecord::from_value(value).unwrap()
}

pub fn remote(value: Value) -> RemoteRecord {
    RemoteRecord::from_value(value).unwrap()
}

pub fn entry(remote_field: &str, local_key: &str) -> MappingEntry {
    MappingEntry {
        salesforce_field_name: remote_field.to_string(),
        hull_field_name: Some(local_key.to_string()),
        ..Default::default()
    }
}

/// Settings with token credentials, one user segment and simple mappings for
/// every type.
pub fn settings() -> ConnectorSettings {
    ConnectorSettings {
        access_token: Some("token".to_string()),
        refresh_token: Some("refresh".to_string()),
        instance_url: Some("https://eu1.example.com".to_string()),
        synchronized_user_segments: vec!["seg-users".to_string()],
        synchronized_account_segments: vec!["seg-accounts".to_string()],
        leads_mapping: vec![
            entry("LastName", "last_name"),
            entry("FirstName", "first_name"),
            MappingEntry {
                default_value: Some("Unknown".to_string()),
                ..entry("Company", "company")
            },
        ],
        contacts_mapping: vec![entry("LastName", "last_name"), entry("FirstName", "first_name")],
        accounts_mapping: vec![entry("Name", "name"), entry("Tags__c", "tags")],
        fetch_lead_fields: vec!["Score__c".to_string()],
        fetch_contact_fields: vec!["Score__c".to_string()],
        ..Default::default()
    }
}

pub fn config(settings: &ConnectorSettings) -> SyncConfig {
    SyncConfig::from_settings(tenant(), settings).unwrap()
}

pub fn agent(
    settings: &ConnectorSettings,
    connection: &Arc<MockConnection>,
    platform: &Arc<MockPlatform>,
) -> Agent {
    Agent::new(config(settings), connection.clone(), platform.clone())
}

pub fn platform_with(settings: &ConnectorSettings, last_sync_at: Option<i64>) -> Arc<MockPlatform> {
    Arc::new(MockPlatform::new(TenantSettings {
        last_sync_at,
        private_settings: settings.clone(),
    }))
}

pub fn user_message(id: &str, email: &str) -> ChangeMessage {
    ChangeMessage::user(local(json!({"id": id, "email": email})))
}

pub fn account_message(id: &str, domain: &str) -> ChangeMessage {
    ChangeMessage::account(local(json!({"id": id, "domain": domain})))
}

// ── Recording sink ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SinkCall {
    pub tenant: TenantId,
    pub kind: SubjectKind,
    pub messages: Vec<ChangeMessage>,
}

impl SinkCall {
    pub fn subject_ids(&self) -> Vec<String> {
        self.messages.iter().filter_map(ChangeMessage::subject_id).collect()
    }
}

/// Sink that records every batch it receives.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(
        &self,
        tenant: &TenantId,
        kind: SubjectKind,
        messages: Vec<ChangeMessage>,
    ) -> SyncResult<()> {
        self.calls.lock().unwrap().push(SinkCall {
            tenant: tenant.clone(),
            kind,
            messages,
        });
        if self.fail {
            return Err(SyncError::Platform("sink down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn sync_users(&self, tenant: &TenantId, messages: Vec<ChangeMessage>) -> SyncResult<()> {
        self.record(tenant, SubjectKind::User, messages)
    }

    async fn sync_accounts(
        &self,
        tenant: &TenantId,
        messages: Vec<ChangeMessage>,
    ) -> SyncResult<()> {
        self.record(tenant, SubjectKind::Account, messages)
    }
}
