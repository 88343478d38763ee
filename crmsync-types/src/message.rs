//! Change notifications fed to the batch aggregator.

use crate::record::LocalRecord;
use serde::{Deserialize, Serialize};

/// A platform segment the subject belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// What kind of subject a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    User,
    Account,
}

impl SubjectKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Account => "account",
        }
    }
}

/// One change notification: a user or an account plus its segments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<LocalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<LocalRecord>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl ChangeMessage {
    /// A message about a user.
    #[must_use]
    pub fn user(record: LocalRecord) -> Self {
        Self {
            user: Some(record),
            ..Default::default()
        }
    }

    /// A message about an account.
    #[must_use]
    pub fn account(record: LocalRecord) -> Self {
        Self {
            account: Some(record),
            ..Default::default()
        }
    }

    /// Attaches segment memberships by id.
    #[must_use]
    pub fn with_segments<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.segments = ids
            .into_iter()
            .map(|id| Segment {
                id: id.into(),
                name: None,
            })
            .collect();
        self
    }

    /// The subject of the message. A user wins if both are set.
    #[must_use]
    pub fn subject(&self) -> Option<(SubjectKind, &LocalRecord)> {
        if let Some(user) = &self.user {
            Some((SubjectKind::User, user))
        } else {
            self.account
                .as_ref()
                .map(|account| (SubjectKind::Account, account))
        }
    }

    /// The subject's platform id.
    #[must_use]
    pub fn subject_id(&self) -> Option<String> {
        self.subject().and_then(|(_, record)| record.id())
    }

    /// Returns true if the subject is in at least one of `segment_ids`.
    #[must_use]
    pub fn in_any_segment(&self, segment_ids: &[String]) -> bool {
        self.segments.iter().any(|s| segment_ids.contains(&s.id))
    }
}
