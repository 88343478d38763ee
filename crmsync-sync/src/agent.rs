//! Per-tenant sync pipeline.
//!
//! The agent owns one remote connection and one platform client and runs
//! both directions of the sync:
//!
//! - outgoing: segment filter, remote search, type resolution, upsert
//! - incoming: incremental fetch window or full scan, trait projection,
//!   platform write

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::platform::{AccountIdentity, PlatformClient, UserIdentity};
use chrono::{DateTime, Datelike, Duration, Utc};
use crmsync_merge::traits::record_traits;
use crmsync_merge::RecordMatcher;
use crmsync_remote::dispatcher::DispatchMetrics;
use crmsync_remote::{
    ConnectionMetrics, FieldDescription, FetchWindow, MeteredConnection, RemoteConnection,
    RemoteFetcher, RemoteSearcher, RestConnection, UpsertDispatcher, UpsertOutcome,
};
use crmsync_types::{ChangeMessage, FieldMapping, LocalRecord, RecordType, RemoteRecord, TenantId};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Overlap applied to the stored cursor so that records modified during the
/// previous fetch are seen again.
const RESUME_OVERLAP_SECS: i64 = 60;

/// Upsert outcomes of one outgoing sync, by remote type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub outcomes: IndexMap<RecordType, UpsertOutcome>,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().map(UpsertOutcome::succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.values().map(UpsertOutcome::failed).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.values().all(UpsertOutcome::is_empty)
    }
}

/// Result of one incoming fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    /// Window used; `None` for full scans.
    pub window: Option<FetchWindow>,
    /// Records written to the platform, by remote type.
    pub written: IndexMap<RecordType, usize>,
    /// Platform writes that failed.
    pub failed: usize,
}

impl FetchReport {
    fn new(window: Option<FetchWindow>) -> Self {
        Self {
            window,
            written: IndexMap::new(),
            failed: 0,
        }
    }

    pub fn total_written(&self) -> usize {
        self.written.values().sum()
    }
}

/// How fetched accounts are identified on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountKey {
    IdAndDomain,
    DomainOnly,
}

/// Sync agent for one tenant.
pub struct Agent {
    config: SyncConfig,
    platform: Arc<dyn PlatformClient>,
    connection: Arc<dyn RemoteConnection>,
    connection_metrics: Option<Arc<ConnectionMetrics>>,
    searcher: RemoteSearcher,
    dispatcher: UpsertDispatcher,
    fetcher: RemoteFetcher,
    matcher: RecordMatcher,
}

impl Agent {
    pub fn new(
        config: SyncConfig,
        connection: Arc<dyn RemoteConnection>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        let searcher = RemoteSearcher::with_config(Arc::clone(&connection), config.search.clone());
        let dispatcher =
            UpsertDispatcher::with_config(Arc::clone(&connection), config.dispatch.clone());
        let fetcher = RemoteFetcher::with_config(Arc::clone(&connection), config.fetch.clone());
        Self {
            config,
            platform,
            connection,
            connection_metrics: None,
            searcher,
            dispatcher,
            fetcher,
            matcher: RecordMatcher::default(),
        }
    }

    /// Builds an agent on a metered REST connection from the configured
    /// credentials.
    pub fn connect(config: SyncConfig, platform: Arc<dyn PlatformClient>) -> SyncResult<Self> {
        let credentials = config
            .credentials
            .as_ref()
            .ok_or(SyncError::MissingCredentials)?;
        let rest = RestConnection::new(credentials.rest_config()?)?;
        let metered = MeteredConnection::new(rest).with_tenant(config.tenant.clone());
        let metrics = metered.metrics();

        let mut agent = Self::new(config, Arc::new(metered), platform);
        agent.connection_metrics = Some(metrics);
        Ok(agent)
    }

    pub fn tenant(&self) -> &TenantId {
        &self.config.tenant
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connection(&self) -> Arc<dyn RemoteConnection> {
        Arc::clone(&self.connection)
    }

    /// Request counters, when the agent owns a metered connection.
    pub fn connection_metrics(&self) -> Option<Arc<ConnectionMetrics>> {
        self.connection_metrics.clone()
    }

    pub fn dispatch_metrics(&self) -> Arc<DispatchMetrics> {
        self.dispatcher.metrics()
    }

    /// Records hydrated by incremental fetches so far.
    pub fn updated_records(&self) -> u64 {
        self.fetcher.updated_records()
    }

    // ── Outgoing ──────────────────────────────────────────────────

    /// Users of `messages`, restricted to the configured user segments when
    /// `apply_filters` is set.
    pub fn users_matching_segments(
        &self,
        messages: &[ChangeMessage],
        apply_filters: bool,
    ) -> Vec<LocalRecord> {
        filter_subjects(messages, &self.config.user_segments, apply_filters, |m| {
            m.user.as_ref()
        })
    }

    /// Accounts of `messages`, restricted to the configured account segments
    /// when `apply_filters` is set.
    pub fn accounts_matching_segments(
        &self,
        messages: &[ChangeMessage],
        apply_filters: bool,
    ) -> Vec<LocalRecord> {
        filter_subjects(messages, &self.config.account_segments, apply_filters, |m| {
            m.account.as_ref()
        })
    }

    /// Pushes user changes to the remote as Leads and Contacts.
    #[instrument(skip_all, fields(tenant = %self.config.tenant, messages = messages.len()))]
    pub async fn sync_users(
        &self,
        messages: &[ChangeMessage],
        apply_filters: bool,
    ) -> SyncResult<SyncReport> {
        let users = self.users_matching_segments(messages, apply_filters);
        if users.is_empty() {
            debug!("no users to synchronize");
            return Ok(SyncReport::default());
        }

        let person_types = [RecordType::Lead, RecordType::Contact];
        let mappings = self.config.mappings.only(&person_types);
        let emails = unique(users.iter().filter_map(LocalRecord::email));

        let index = self.searcher.search_emails(&emails, &mappings).await?;
        let mut resolved = self.matcher.resolve_users(&index, &users, &mappings)?;

        let mut report = SyncReport::default();
        for record_type in person_types {
            let patches = resolved.take(&record_type);
            if patches.is_empty() {
                continue;
            }
            let outcome = self
                .dispatcher
                .upsert(&record_type, &patches, record_type.default_external_id_field())
                .await?;
            report.outcomes.insert(record_type, outcome);
        }

        info!(
            users = users.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "users synchronized"
        );
        Ok(report)
    }

    /// Pushes account changes to the remote as Accounts.
    #[instrument(skip_all, fields(tenant = %self.config.tenant, messages = messages.len()))]
    pub async fn sync_accounts(
        &self,
        messages: &[ChangeMessage],
        apply_filters: bool,
    ) -> SyncResult<SyncReport> {
        let accounts = self.accounts_matching_segments(messages, apply_filters);
        let Some(mapping) = self.config.mappings.get(&RecordType::Account) else {
            debug!("no account mapping configured");
            return Ok(SyncReport::default());
        };
        if accounts.is_empty() {
            debug!("no accounts to synchronize");
            return Ok(SyncReport::default());
        }

        let mappings = self.config.mappings.only(&[RecordType::Account]);
        let domains = unique(accounts.iter().filter_map(LocalRecord::domain));
        let external_ids = unique(
            accounts
                .iter()
                .filter_map(|a| a.str_field(&self.config.account_match.external_id_attribute)),
        );

        let mut index = self.searcher.search_domains(&domains, &mappings).await?;
        if !external_ids.is_empty() {
            let fields: Vec<String> = mapping.remote_fields().map(str::to_string).collect();
            index.merge(
                self.searcher
                    .search_ids(&RecordType::Account, &external_ids, &fields)
                    .await?,
            );
        }

        let mut resolved = self.matcher.resolve_accounts(
            &index,
            &accounts,
            mapping,
            &self.config.account_match,
        )?;

        let mut report = SyncReport::default();
        let patches = resolved.take(&RecordType::Account);
        if !patches.is_empty() {
            let outcome = self
                .dispatcher
                .upsert(
                    &RecordType::Account,
                    &patches,
                    RecordType::Account.default_external_id_field(),
                )
                .await?;
            report.outcomes.insert(RecordType::Account, outcome);
        }

        info!(
            accounts = accounts.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "accounts synchronized"
        );
        Ok(report)
    }

    // ── Incoming ──────────────────────────────────────────────────

    /// Fetches records changed since the last run and writes their traits
    /// to the platform.
    ///
    /// Without `since`, the window starts one minute before the stored
    /// cursor if that lies in the current year, otherwise one hour ago. The
    /// cursor moves to the start of this run once every type was fetched.
    #[instrument(skip_all, fields(tenant = %self.config.tenant))]
    pub async fn fetch_changes(&self, since: Option<DateTime<Utc>>) -> SyncResult<FetchReport> {
        let started = Utc::now();
        let settings = self.platform.settings().await?;
        let since = since.or_else(|| resume_point(settings.last_sync_at, started));
        let window = FetchWindow::with_overrides(since, Some(started));
        debug!(since = %window.since, until = %window.until, "fetch window");

        let mut report = FetchReport::new(Some(window));
        for (record_type, mapping) in self.fetched_mappings() {
            let fields: Vec<String> = mapping.fetch_field_names().map(str::to_string).collect();
            let records = self
                .fetcher
                .fetch_updated(record_type, &fields, window)
                .await?;
            self.write_traits(record_type, mapping, &records, AccountKey::IdAndDomain, &mut report)
                .await;
        }

        // Re-read so concurrent settings changes are not overwritten.
        let mut settings = self.platform.settings().await?;
        settings.last_sync_at = Some(started.timestamp_millis());
        self.platform.update_settings(settings).await?;

        info!(
            written = report.total_written(),
            failed = report.failed,
            "fetch done"
        );
        Ok(report)
    }

    /// Fetches every remote record of the mapped types and writes their
    /// traits to the platform. Accounts are identified by domain only.
    #[instrument(skip_all, fields(tenant = %self.config.tenant))]
    pub async fn fetch_all(&self) -> SyncResult<FetchReport> {
        let mut report = FetchReport::new(None);
        for (record_type, mapping) in self.fetched_mappings() {
            let fields: Vec<String> = mapping.fetch_field_names().map(str::to_string).collect();
            let records = self.fetcher.fetch_all(record_type, &fields).await?;
            self.write_traits(record_type, mapping, &records, AccountKey::DomainOnly, &mut report)
                .await;
        }

        info!(
            written = report.total_written(),
            failed = report.failed,
            "full fetch done"
        );
        Ok(report)
    }

    /// Remote field names per mapped type, keyed by the lowercase type name,
    /// plus `<type>_updateable` and `<type>_custom` subsets. All lists are
    /// sorted.
    pub async fn fields_schema(&self) -> SyncResult<BTreeMap<String, Vec<String>>> {
        let mut schema = BTreeMap::new();
        for record_type in self.config.mappings.types() {
            if matches!(record_type, RecordType::Custom(_)) {
                continue;
            }
            let descriptions = self.fetcher.field_descriptions(record_type).await?;
            let key = record_type.name().to_lowercase();

            schema.insert(
                format!("{key}_updateable"),
                sorted_names(&descriptions, |f| f.updateable),
            );
            schema.insert(format!("{key}_custom"), sorted_names(&descriptions, |f| f.custom));
            schema.insert(key, sorted_names(&descriptions, |_| true));
        }
        Ok(schema)
    }

    /// Mappings the incoming flow reads: person types always, accounts only
    /// when enabled, and only types with fetch fields.
    fn fetched_mappings(&self) -> impl Iterator<Item = (&RecordType, &FieldMapping)> {
        self.config.mappings.iter().filter(|(record_type, mapping)| {
            let enabled = match record_type {
                RecordType::Lead | RecordType::Contact => true,
                RecordType::Account => self.config.fetch_accounts,
                RecordType::Custom(_) => false,
            };
            enabled && !mapping.fetch_fields.is_empty()
        })
    }

    /// Writes the traits of `records` to the platform. A failed write is
    /// logged and counted; it does not stop the others.
    async fn write_traits(
        &self,
        record_type: &RecordType,
        mapping: &FieldMapping,
        records: &[RemoteRecord],
        account_key: AccountKey,
        report: &mut FetchReport,
    ) {
        let mut written = 0;
        for record in records {
            let traits = record_traits(record, mapping);
            if traits.is_empty() {
                continue;
            }

            let result = if record_type.is_person() {
                let Some(email) = record.str_field("Email") else {
                    debug!(id = ?record.id(), "fetched person without email skipped");
                    continue;
                };
                let identity = UserIdentity {
                    email: email.to_string(),
                };
                self.platform.write_user_traits(identity, traits).await
            } else {
                let identity = AccountIdentity {
                    external_id: match account_key {
                        AccountKey::IdAndDomain => record.id().map(str::to_string),
                        AccountKey::DomainOnly => None,
                    },
                    domain: record.str_field("Website").map(str::to_string),
                };
                if identity.external_id.is_none() && identity.domain.is_none() {
                    debug!("fetched account without identity skipped");
                    continue;
                }
                self.platform.write_account_traits(identity, traits).await
            };

            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(record_type = %record_type, id = ?record.id(), error = %e, "trait write failed");
                }
            }
        }
        *report.written.entry(record_type.clone()).or_default() += written;
    }
}

/// Start of the next window derived from a stored cursor in epoch
/// milliseconds. Cursors outside the current year are ignored.
pub fn resume_point(last_sync_at: Option<i64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let last = DateTime::<Utc>::from_timestamp_millis(last_sync_at?)?;
    let start = last - Duration::seconds(RESUME_OVERLAP_SECS);
    (start.year() == now.year()).then_some(start)
}

fn sorted_names(
    descriptions: &IndexMap<String, FieldDescription>,
    pick: impl Fn(&FieldDescription) -> bool,
) -> Vec<String> {
    let mut names: Vec<String> = descriptions
        .values()
        .filter(|f| pick(f))
        .map(|f| f.name.clone())
        .collect();
    names.sort();
    names
}

fn filter_subjects<'a>(
    messages: &'a [ChangeMessage],
    segments: &[String],
    apply_filters: bool,
    subject: impl Fn(&'a ChangeMessage) -> Option<&'a LocalRecord>,
) -> Vec<LocalRecord> {
    messages
        .iter()
        .filter(|m| !apply_filters || m.in_any_segment(segments))
        .filter_map(subject)
        .cloned()
        .collect()
}

/// Distinct values, in first-seen order.
fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .map(str::to_string)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}
