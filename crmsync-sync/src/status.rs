//! Connector health check.

use crate::config::ConnectorSettings;
use crmsync_remote::RemoteConnection;
use crmsync_types::RecordType;
use serde::Serialize;

/// Overall health, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: Status,
    pub messages: Vec<String>,
}

impl StatusReport {
    /// Adds a message. The status only ever rises: a warning never hides an
    /// earlier error.
    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.status = self.status.max(status);
        self.messages.push(message.into());
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

/// Checks the settings for missing credentials and mappings.
pub fn status_check(settings: &ConnectorSettings) -> StatusReport {
    let mut report = StatusReport::default();

    if is_set(&settings.instance_url) {
        if !is_set(&settings.access_token) {
            report.push(
                Status::Error,
                "External service credentials aren’t set: missing API access token.",
            );
        }
        if !is_set(&settings.refresh_token) {
            report.push(
                Status::Error,
                "External service credentials aren’t set: missing API refresh token.",
            );
        }
    }

    if settings.synchronized_user_segments.is_empty() {
        report.push(
            Status::Error,
            "No segments will be synchronized because of missing configuration",
        );
    }

    if settings.leads_mapping.is_empty() {
        report.push(
            Status::Error,
            "No leads will be sent from Hull to Salesforce due to missing configuration",
        );
    }

    if settings.fetch_lead_fields.is_empty() {
        report.push(
            Status::Warning,
            "No lead fields will be fetched from Salesforce due to missing configuration",
        );
    }

    if settings.fetch_contact_fields.is_empty() {
        report.push(
            Status::Warning,
            "No contacts fields will be fetched from Salesforce due to missing configuration",
        );
    }

    if settings.contacts_mapping.is_empty() {
        report.push(
            Status::Warning,
            "No contacts will be sent from Hull to Salesforce due to missing configuration",
        );
    }

    if is_set(&settings.salesforce_login_url)
        && (!is_set(&settings.salesforce_login) || !is_set(&settings.salesforce_password))
    {
        report.push(
            Status::Error,
            "External service credentials aren’t set: missing API login and password",
        );
    }

    report
}

/// Runs [`status_check`] and, when the settings are clean, verifies the
/// remote answers a describe call.
pub async fn status_check_with_connection(
    settings: &ConnectorSettings,
    connection: &dyn RemoteConnection,
) -> StatusReport {
    let mut report = status_check(settings);
    if !report.messages.is_empty() {
        return report;
    }

    if let Err(e) = connection.describe(&RecordType::Lead).await {
        report.push(
            Status::Error,
            format!("Could not connect to SFDC API. Error: {e}"),
        );
    }
    report
}
