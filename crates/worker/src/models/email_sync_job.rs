//! Paginated email ingestion job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{JobId, UnknownStatus};

/// Lifecycle status of an [`EmailSyncJob`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailSyncStatus {
    /// Ready to fetch the next page
    Pending,
    /// A page fetch is in flight
    Processing,
    /// All historical mail fetched
    Synced,
    /// Reserved for webhook registration; never produced by the watcher
    Completed,
    Failed,
}

impl EmailSyncStatus {
    pub const ALL: [EmailSyncStatus; 5] = [
        EmailSyncStatus::Pending,
        EmailSyncStatus::Processing,
        EmailSyncStatus::Synced,
        EmailSyncStatus::Completed,
        EmailSyncStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmailSyncStatus::Pending => "pending",
            EmailSyncStatus::Processing => "processing",
            EmailSyncStatus::Synced => "synced",
            EmailSyncStatus::Completed => "completed",
            EmailSyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EmailSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailSyncStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                field: "email sync status",
                value: s.to_string(),
            })
    }
}

/// What kind of mail window a job ingests. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Historical backfill over the initial window
    Initial,
    /// Mail received since the job last progressed
    Incremental,
    /// Push-triggered sync
    Webhook,
}

impl SyncType {
    pub const ALL: [SyncType; 3] = [SyncType::Initial, SyncType::Incremental, SyncType::Webhook];

    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::Initial => "initial",
            SyncType::Incremental => "incremental",
            SyncType::Webhook => "webhook",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sync_type| sync_type.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                field: "sync type",
                value: s.to_string(),
            })
    }
}

/// Email ingestion progress for one account
///
/// Advanced one page per scheduler tick. `last_synced_at` doubles as the
/// round-robin key: `None` means the job has never progressed and is
/// picked before anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSyncJob {
    pub id: JobId,
    pub account_id: String,
    pub status: EmailSyncStatus,
    pub sync_type: SyncType,
    /// Cumulative across all pages
    pub emails_fetched: u32,
    /// Continuation cursor; `None` means no further pages are known
    pub page_token: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl EmailSyncJob {
    /// A fresh Pending job with no progress
    pub fn new(account_id: impl Into<String>, sync_type: SyncType) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            account_id: account_id.into(),
            status: EmailSyncStatus::Pending,
            sync_type,
            emails_fetched: 0,
            page_token: None,
            last_synced_at: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// The first ingestion job chained after account onboarding
    pub fn initial(account_id: impl Into<String>) -> Self {
        Self::new(account_id, SyncType::Initial)
    }

    pub fn with_last_synced_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced_at = Some(at);
        self
    }

    pub fn with_progress(mut self, emails_fetched: u32, page_token: Option<&str>) -> Self {
        self.emails_fetched = emails_fetched;
        self.page_token = page_token.map(str::to_string);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}
