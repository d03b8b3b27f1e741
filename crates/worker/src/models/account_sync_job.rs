//! Account onboarding sync job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{JobId, UnknownStatus};

/// Lifecycle status of an [`AccountSyncJob`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSyncStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AccountSyncStatus {
    pub const ALL: [AccountSyncStatus; 4] = [
        AccountSyncStatus::Pending,
        AccountSyncStatus::Processing,
        AccountSyncStatus::Completed,
        AccountSyncStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccountSyncStatus::Pending => "pending",
            AccountSyncStatus::Processing => "processing",
            AccountSyncStatus::Completed => "completed",
            AccountSyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AccountSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountSyncStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                field: "account sync status",
                value: s.to_string(),
            })
    }
}

/// One onboarding job per external account
///
/// Created outside the watcher (when an account is linked), then driven
/// by the account coordinator until it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSyncJob {
    pub id: JobId,
    pub account_id: String,
    pub status: AccountSyncStatus,
    pub attempts: u32,
    /// Error text of the most recent failure; kept after later successes
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while the job sits in Completed or Failed, `None` otherwise
    pub processed_at: Option<DateTime<Utc>>,
}

impl AccountSyncJob {
    /// A fresh Pending job for `account_id`
    pub fn new(account_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            account_id: account_id.into(),
            status: AccountSyncStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Override the creation time (fixtures and imports)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = AccountSyncJob::new("acc-1");
        assert_eq!(job.account_id, "acc-1");
        assert_eq!(job.status, AccountSyncStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert!(job.processed_at.is_none());
    }

    #[test]
    fn test_status_parse_matches_as_str() {
        for status in AccountSyncStatus::ALL {
            assert_eq!(status.as_str().parse::<AccountSyncStatus>().unwrap(), status);
        }
        assert!("synced".parse::<AccountSyncStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&AccountSyncStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
