//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{
    Account, AccountSyncJob, AccountSyncStatus, EmailSyncJob, EmailSyncStatus, JobId, SyncType,
};

/// Persisted account-sync and email-sync job rows
///
/// Implementations must validate every status write with
/// [`crate::state::validate_transition`] and fail with
/// [`crate::state::JobNotFound`] when the addressed row is missing.
/// Callers detect both through [`crate::state::is_invariant_violation`].
pub trait JobStore: Send + Sync {
    // === Account sync jobs ===

    /// Enqueue an onboarding job. Fails if the account already has one.
    fn create_account_sync_job(&self, account_id: &str) -> Result<AccountSyncJob>;

    fn get_account_sync_job(&self, id: &JobId) -> Result<Option<AccountSyncJob>>;

    /// Up to `limit` account jobs in `status`, oldest `created_at` first.
    ///
    /// With `attempts_below` set, jobs whose attempt count reached it are
    /// left out.
    fn list_account_sync_jobs(
        &self,
        status: AccountSyncStatus,
        limit: usize,
        attempts_below: Option<u32>,
    ) -> Result<Vec<AccountSyncJob>>;

    /// Move a job to `status`, stamping `processed_at` on Completed/Failed
    /// and clearing it otherwise. `last_error`, when given, replaces the
    /// stored error; `None` leaves it untouched.
    fn transition_account_sync_job(
        &self,
        id: &JobId,
        status: AccountSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    fn increment_account_sync_attempts(&self, id: &JobId) -> Result<()>;

    // === Email sync jobs ===

    /// Insert a Pending job with no progress and `last_synced_at = None`
    fn create_email_sync_job(&self, account_id: &str, sync_type: SyncType)
    -> Result<EmailSyncJob>;

    fn get_email_sync_job(&self, id: &JobId) -> Result<Option<EmailSyncJob>>;

    /// Up to `limit` email jobs in `status` in round-robin order:
    /// never-synced jobs first, then oldest `last_synced_at`, ties broken
    /// by `created_at`.
    fn list_email_sync_jobs(
        &self,
        status: EmailSyncStatus,
        limit: usize,
        attempts_below: Option<u32>,
    ) -> Result<Vec<EmailSyncJob>>;

    /// Same contract as [`JobStore::transition_account_sync_job`], with
    /// Synced/Completed/Failed as the processed statuses.
    fn transition_email_sync_job(
        &self,
        id: &JobId,
        status: EmailSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    fn increment_email_sync_attempts(&self, id: &JobId) -> Result<()>;

    /// Record fetch progress and stamp `last_synced_at` with the current time
    fn update_email_progress(
        &self,
        id: &JobId,
        emails_fetched: u32,
        page_token: Option<&str>,
    ) -> Result<()>;
}

/// Linked account rows read by the processors
pub trait AccountStore: Send + Sync {
    fn get_account(&self, id: &str) -> Result<Option<Account>>;

    /// Insert or replace an account row
    fn upsert_account(&self, account: Account) -> Result<()>;

    /// Persist a refreshed token pair
    fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
}
