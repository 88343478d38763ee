//! Connector configuration.
//!
//! [`ConnectorSettings`] is the raw, serde-shaped settings object stored on
//! the platform for each tenant. [`SyncConfig`] is what the agent runs with:
//! mappings, credentials and segment filters built from those settings.
//! [`BatchConfig`] holds the process-level aggregator knobs.

use crate::error::{SyncError, SyncResult};
use crmsync_merge::AccountMatchOptions;
use crmsync_remote::{DispatchConfig, FetchConfig, RestConfig, SearchConfig};
use crmsync_types::{FieldMapping, FieldRule, MappingSet, RecordType, TenantId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Separator used to flatten array values written to accounts.
pub const ACCOUNT_ARRAY_SEPARATOR: &str = ";";

/// (remote field, top-level attribute, trait name) read back for leads.
const LEAD_FETCH_FIELDS: &[(&str, Option<&str>, &str)] = &[
    ("Email", None, "email"),
    ("FirstName", Some("first_name"), "first_name"),
    ("LastName", Some("last_name"), "last_name"),
    ("Name", None, "name"),
    ("IsConverted", None, "is_converted"),
    ("Salutation", Some("salutation"), "salutation"),
    ("Title", Some("title"), "title"),
    ("Company", None, "company"),
    ("Industry", None, "industry"),
    ("Phone", Some("phone"), "phone"),
    ("MobilePhone", Some("mobile_phone"), "mobile_phone"),
    ("Fax", Some("fax"), "fax"),
    ("CreatedDate", None, "created_at"),
    ("LastModifiedDate", None, "last_modified_date"),
    ("SystemModstamp", None, "system_modstamp"),
    ("LastActivityDate", None, "last_activity_date"),
    ("ConvertedDate", None, "converted_at"),
    ("City", Some("city"), "city"),
    ("PostalCode", Some("postal_code"), "postal_code"),
    ("State", Some("state"), "state"),
    ("Country", Some("country"), "country"),
    ("AnnualRevenue", None, "annual_revenue"),
    ("Website", Some("website"), "website"),
    ("Id", None, "id"),
    ("OwnerId", None, "owner_id"),
];

/// (remote field, top-level attribute, trait name) read back for contacts.
const CONTACT_FETCH_FIELDS: &[(&str, Option<&str>, &str)] = &[
    ("Email", None, "email"),
    ("FirstName", Some("first_name"), "first_name"),
    ("LastName", Some("last_name"), "last_name"),
    ("Name", None, "name"),
    ("Salutation", Some("salutation"), "salutation"),
    ("Title", Some("title"), "title"),
    ("Phone", Some("phone"), "phone"),
    ("MobilePhone", Some("mobile_phone"), "mobile_phone"),
    ("LastModifiedDate", None, "last_modified_date"),
    ("SystemModstamp", None, "system_modstamp"),
    ("LastActivityDate", None, "last_activity_date"),
    ("MailingStreet", Some("street"), "mailing_street"),
    ("MailingCity", Some("city"), "mailing_city"),
    ("MailingPostalCode", Some("postal_code"), "mailing_postal_code"),
    ("MailingState", Some("state"), "mailing_state"),
    ("MailingCountry", Some("country"), "mailing_country"),
    ("Birthdate", None, "birthdate"),
    ("Id", None, "id"),
    ("OwnerId", None, "owner_id"),
];

fn default_fetch_fields(record_type: &RecordType) -> &'static [(&'static str, Option<&'static str>, &'static str)] {
    match record_type {
        RecordType::Lead => LEAD_FETCH_FIELDS,
        RecordType::Contact => CONTACT_FETCH_FIELDS,
        _ => &[],
    }
}

/// One outgoing field mapping entry as stored in settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingEntry {
    pub salesforce_field_name: String,
    pub hull_field_name: Option<String>,
    pub default_value: Option<String>,
    pub tpl: Option<String>,
    pub overwrite: Option<bool>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl MappingEntry {
    /// Converts the entry to a field rule. A platform attribute wins over a
    /// template; an entry with neither is rejected.
    pub fn to_rule(&self) -> SyncResult<FieldRule> {
        let rule = if let Some(key) = non_empty(&self.hull_field_name) {
            FieldRule::keyed(key)
        } else if let Some(template) = non_empty(&self.tpl) {
            FieldRule::templated(template)
        } else {
            return Err(SyncError::Config(format!(
                "mapping for `{}` has neither hull_field_name nor tpl",
                self.salesforce_field_name
            )));
        };
        let rule = match non_empty(&self.default_value) {
            Some(default_value) => rule.with_default(default_value),
            None => rule,
        };

        Ok(if self.overwrite == Some(true) {
            rule.overwriting()
        } else {
            rule
        })
    }
}

/// Per-tenant connector settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub instance_url: Option<String>,
    pub salesforce_login: Option<String>,
    pub salesforce_password: Option<String>,
    pub salesforce_login_url: Option<String>,

    pub synchronized_user_segments: Vec<String>,
    pub synchronized_account_segments: Vec<String>,
    /// Also write fetched accounts back to the platform.
    pub fetch_accounts: bool,

    pub leads_mapping: Vec<MappingEntry>,
    pub contacts_mapping: Vec<MappingEntry>,
    pub accounts_mapping: Vec<MappingEntry>,

    pub fetch_lead_fields: Vec<String>,
    pub fetch_contact_fields: Vec<String>,
    pub fetch_account_fields: Vec<String>,
}

impl ConnectorSettings {
    fn outgoing(&self, record_type: &RecordType) -> &[MappingEntry] {
        match record_type {
            RecordType::Lead => &self.leads_mapping,
            RecordType::Contact => &self.contacts_mapping,
            RecordType::Account => &self.accounts_mapping,
            RecordType::Custom(_) => &[],
        }
    }

    fn custom_fetch_fields(&self, record_type: &RecordType) -> &[String] {
        match record_type {
            RecordType::Lead => &self.fetch_lead_fields,
            RecordType::Contact => &self.fetch_contact_fields,
            RecordType::Account => &self.fetch_account_fields,
            RecordType::Custom(_) => &[],
        }
    }
}

/// Settings object of a tenant: the connector settings plus the incoming
/// sync cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    /// Start of the last successful incremental fetch, in epoch
    /// milliseconds.
    pub last_sync_at: Option<i64>,
    pub private_settings: ConnectorSettings,
}

/// How the agent authenticates against the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    Token {
        access_token: String,
        refresh_token: Option<String>,
        instance_url: String,
    },
    Password {
        login: String,
        password: String,
        login_url: Option<String>,
    },
}

impl Credentials {
    /// Picks token credentials when complete, else a login and password.
    pub fn from_settings(settings: &ConnectorSettings) -> Option<Self> {
        if let (Some(access_token), Some(instance_url)) = (
            non_empty(&settings.access_token),
            non_empty(&settings.instance_url),
        ) {
            return Some(Credentials::Token {
                access_token: access_token.to_string(),
                refresh_token: settings.refresh_token.clone(),
                instance_url: instance_url.to_string(),
            });
        }

        match (
            non_empty(&settings.salesforce_login),
            non_empty(&settings.salesforce_password),
        ) {
            (Some(login), Some(password)) => Some(Credentials::Password {
                login: login.to_string(),
                password: password.to_string(),
                login_url: settings.salesforce_login_url.clone(),
            }),
            _ => None,
        }
    }

    /// REST connection settings. Only token credentials can be used
    /// directly; a password login needs a token exchange first.
    pub fn rest_config(&self) -> SyncResult<RestConfig> {
        match self {
            Credentials::Token {
                access_token,
                instance_url,
                ..
            } => Ok(RestConfig {
                instance_url: instance_url.clone(),
                access_token: access_token.clone(),
                ..Default::default()
            }),
            Credentials::Password { .. } => Err(SyncError::Config(
                "password login must be exchanged for an access token first".to_string(),
            )),
        }
    }
}

/// Everything the agent needs to synchronize one tenant.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub tenant: TenantId,
    pub credentials: Option<Credentials>,
    /// Mappings for Lead, Contact and Account, in that order.
    pub mappings: MappingSet,
    pub user_segments: Vec<String>,
    pub account_segments: Vec<String>,
    pub fetch_accounts: bool,
    pub account_match: AccountMatchOptions,
    pub search: SearchConfig,
    pub dispatch: DispatchConfig,
    pub fetch: FetchConfig,
}

impl SyncConfig {
    /// Record types the connector always maps.
    pub const TYPES: [RecordType; 3] = [RecordType::Lead, RecordType::Contact, RecordType::Account];

    /// Builds the configuration from tenant settings.
    pub fn from_settings(tenant: TenantId, settings: &ConnectorSettings) -> SyncResult<Self> {
        let mut mappings = MappingSet::new();
        for record_type in Self::TYPES {
            let mapping = Self::mapping_for(&record_type, settings)?;
            mappings.insert(record_type, mapping);
        }

        Ok(Self {
            tenant,
            credentials: Credentials::from_settings(settings),
            mappings,
            user_segments: settings.synchronized_user_segments.clone(),
            account_segments: settings.synchronized_account_segments.clone(),
            fetch_accounts: settings.fetch_accounts,
            account_match: AccountMatchOptions::default(),
            search: SearchConfig::default(),
            dispatch: DispatchConfig::default(),
            fetch: FetchConfig::default(),
        })
    }

    fn mapping_for(record_type: &RecordType, settings: &ConnectorSettings) -> SyncResult<FieldMapping> {
        let mut mapping = FieldMapping::new();

        for entry in settings.outgoing(record_type) {
            if entry.salesforce_field_name.is_empty() {
                continue;
            }
            mapping
                .fields
                .insert(entry.salesforce_field_name.clone(), entry.to_rule()?);
        }

        for &(remote_field, top_level, trait_name) in default_fetch_fields(record_type) {
            mapping
                .fetch_fields
                .insert(remote_field.to_string(), Some(trait_name.to_string()));
            mapping
                .fetch_to_top_level
                .insert(remote_field.to_string(), top_level.map(str::to_string));
        }
        // Custom fields derive their trait name and never reach top level.
        for remote_field in settings.custom_fetch_fields(record_type) {
            mapping.fetch_fields.insert(remote_field.clone(), None);
        }

        if record_type.is_organization() {
            mapping.join_arrays = Some(ACCOUNT_ARRAY_SEPARATOR.to_string());
        }
        Ok(mapping)
    }
}

/// Batch aggregator knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// A pending map larger than this is flushed immediately.
    pub max_batch_size: usize,
    /// Delay of the trailing-edge flush.
    pub throttle: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 99,
            throttle: Duration::from_millis(30_000),
        }
    }
}

impl BatchConfig {
    /// Reads `MAX_BATCH_SIZE` and `BATCH_THROTTLE` (milliseconds). Unset or
    /// unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_batch_size: env_number("MAX_BATCH_SIZE")
                .map_or(defaults.max_batch_size, |v| v as usize),
            throttle: env_number("BATCH_THROTTLE")
                .map_or(defaults.throttle, Duration::from_millis),
        }
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}
