//! In-memory storage implementation
//!
//! Backs the unit and integration tests. Each map sits behind its own
//! `RwLock`; every mutation happens under a single write guard, so
//! read-validate-write is atomic per job.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::ordering::{account_fifo, below_ceiling, email_round_robin};
use super::{AccountStore, JobStore};
use crate::models::{
    Account, AccountSyncJob, AccountSyncStatus, EmailSyncJob, EmailSyncStatus, JobId, JobKind,
    SyncType,
};
use crate::state::{JobNotFound, JobState, validate_transition};

/// In-memory implementation of [`JobStore`] and [`AccountStore`]
pub struct InMemoryJobStore {
    account_jobs: RwLock<HashMap<JobId, AccountSyncJob>>,
    email_jobs: RwLock<HashMap<JobId, EmailSyncJob>>,
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            account_jobs: RwLock::new(HashMap::new()),
            email_jobs: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a prepared account job as-is
    pub fn insert_account_sync_job(&self, job: AccountSyncJob) {
        self.account_jobs.write().unwrap().insert(job.id.clone(), job);
    }

    /// Insert a prepared email job as-is
    pub fn insert_email_sync_job(&self, job: EmailSyncJob) {
        self.email_jobs.write().unwrap().insert(job.id.clone(), job);
    }

    /// All email jobs for an account, oldest first
    pub fn email_sync_jobs_for_account(&self, account_id: &str) -> Vec<EmailSyncJob> {
        let jobs = self.email_jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|job| job.account_id == account_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        result
    }

    pub fn count_email_sync_jobs(&self) -> usize {
        self.email_jobs.read().unwrap().len()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: JobKind, id: &JobId) -> anyhow::Error {
    JobNotFound {
        kind,
        job_id: id.clone(),
    }
    .into()
}

fn processed_at_for<S: JobState>(status: S, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    status.is_processed().then_some(now)
}

impl JobStore for InMemoryJobStore {
    fn create_account_sync_job(&self, account_id: &str) -> Result<AccountSyncJob> {
        let mut jobs = self.account_jobs.write().unwrap();
        if jobs.values().any(|job| job.account_id == account_id) {
            bail!("account {} already has a sync job", account_id);
        }
        let job = AccountSyncJob::new(account_id);
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn get_account_sync_job(&self, id: &JobId) -> Result<Option<AccountSyncJob>> {
        Ok(self.account_jobs.read().unwrap().get(id).cloned())
    }

    fn list_account_sync_jobs(
        &self,
        status: AccountSyncStatus,
        limit: usize,
        attempts_below: Option<u32>,
    ) -> Result<Vec<AccountSyncJob>> {
        let jobs = self.account_jobs.read().unwrap();
        let mut matching: Vec<_> = jobs
            .values()
            .filter(|job| job.status == status && below_ceiling(job.attempts, attempts_below))
            .cloned()
            .collect();
        matching.sort_by(account_fifo);
        matching.truncate(limit);
        Ok(matching)
    }

    fn transition_account_sync_job(
        &self,
        id: &JobId,
        status: AccountSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.account_jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| not_found(JobKind::AccountSync, id))?;
        validate_transition(id, job.status, status)?;

        let now = Utc::now();
        job.status = status;
        job.processed_at = processed_at_for(status, now);
        if let Some(message) = last_error {
            job.last_error = Some(message.to_string());
        }
        job.updated_at = now;
        Ok(())
    }

    fn increment_account_sync_attempts(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.account_jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| not_found(JobKind::AccountSync, id))?;
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(())
    }

    fn create_email_sync_job(&self, account_id: &str, sync_type: SyncType) -> Result<EmailSyncJob> {
        let job = EmailSyncJob::new(account_id, sync_type);
        self.email_jobs
            .write()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn get_email_sync_job(&self, id: &JobId) -> Result<Option<EmailSyncJob>> {
        Ok(self.email_jobs.read().unwrap().get(id).cloned())
    }

    fn list_email_sync_jobs(
        &self,
        status: EmailSyncStatus,
        limit: usize,
        attempts_below: Option<u32>,
    ) -> Result<Vec<EmailSyncJob>> {
        let jobs = self.email_jobs.read().unwrap();
        let mut matching: Vec<_> = jobs
            .values()
            .filter(|job| job.status == status && below_ceiling(job.attempts, attempts_below))
            .cloned()
            .collect();
        matching.sort_by(email_round_robin);
        matching.truncate(limit);
        Ok(matching)
    }

    fn transition_email_sync_job(
        &self,
        id: &JobId,
        status: EmailSyncStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.email_jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| not_found(JobKind::EmailSync, id))?;
        validate_transition(id, job.status, status)?;

        let now = Utc::now();
        job.status = status;
        job.processed_at = processed_at_for(status, now);
        if let Some(message) = last_error {
            job.last_error = Some(message.to_string());
        }
        job.updated_at = now;
        Ok(())
    }

    fn increment_email_sync_attempts(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.email_jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| not_found(JobKind::EmailSync, id))?;
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(())
    }

    fn update_email_progress(
        &self,
        id: &JobId,
        emails_fetched: u32,
        page_token: Option<&str>,
    ) -> Result<()> {
        let mut jobs = self.email_jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| not_found(JobKind::EmailSync, id))?;

        let now = Utc::now();
        job.emails_fetched = emails_fetched;
        job.page_token = page_token.map(str::to_string);
        job.last_synced_at = Some(now);
        job.updated_at = now;
        Ok(())
    }
}

impl AccountStore for InMemoryJobStore {
    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.read().unwrap().get(id).cloned())
    }

    fn upsert_account(&self, account: Account) -> Result<()> {
        self.accounts
            .write()
            .unwrap()
            .insert(account.id.clone(), account);
        Ok(())
    }

    fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        let Some(account) = accounts.get_mut(id) else {
            bail!("account {} not found", id);
        };
        account.access_token = Some(access_token.to_string());
        account.refresh_token = Some(refresh_token.to_string());
        account.access_token_expires_at = Some(expires_at);
        account.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{IllegalTransition, is_invariant_violation};
    use chrono::Duration;

    #[test]
    fn test_account_job_lifecycle_stamps_processed_at() {
        let store = InMemoryJobStore::new();
        let job = store.create_account_sync_job("acc-1").unwrap();

        store
            .transition_account_sync_job(&job.id, AccountSyncStatus::Processing, None)
            .unwrap();
        let current = store.get_account_sync_job(&job.id).unwrap().unwrap();
        assert!(current.processed_at.is_none());

        store
            .transition_account_sync_job(&job.id, AccountSyncStatus::Failed, Some("boom"))
            .unwrap();
        let current = store.get_account_sync_job(&job.id).unwrap().unwrap();
        assert!(current.processed_at.is_some());
        assert_eq!(current.last_error.as_deref(), Some("boom"));

        // Retry re-entry clears processed_at but keeps the last error
        store
            .transition_account_sync_job(&job.id, AccountSyncStatus::Processing, None)
            .unwrap();
        let current = store.get_account_sync_job(&job.id).unwrap().unwrap();
        assert!(current.processed_at.is_none());
        assert_eq!(current.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.create_account_sync_job("acc-1").unwrap();

        let err = store
            .transition_account_sync_job(&job.id, AccountSyncStatus::Completed, None)
            .unwrap_err();
        assert!(err.downcast_ref::<IllegalTransition>().is_some());

        let current = store.get_account_sync_job(&job.id).unwrap().unwrap();
        assert_eq!(current.status, AccountSyncStatus::Pending);
    }

    #[test]
    fn test_update_missing_job_is_invariant_violation() {
        let store = InMemoryJobStore::new();
        let err = store
            .increment_email_sync_attempts(&JobId::new("nope"))
            .unwrap_err();
        assert!(is_invariant_violation(&err));
    }

    #[test]
    fn test_duplicate_account_job_rejected() {
        let store = InMemoryJobStore::new();
        store.create_account_sync_job("acc-1").unwrap();
        assert!(store.create_account_sync_job("acc-1").is_err());
    }

    #[test]
    fn test_list_email_jobs_round_robin_and_ceiling() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let old = EmailSyncJob::initial("a").with_last_synced_at(now - Duration::hours(2));
        let recent = EmailSyncJob::initial("b").with_last_synced_at(now - Duration::hours(1));
        let mut fresh = EmailSyncJob::initial("c");
        fresh.attempts = 3;
        store.insert_email_sync_job(recent.clone());
        store.insert_email_sync_job(old.clone());
        store.insert_email_sync_job(fresh.clone());

        let ids: Vec<_> = store
            .list_email_sync_jobs(EmailSyncStatus::Pending, 10, None)
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec![fresh.id.clone(), old.id.clone(), recent.id.clone()]);

        let limited = store
            .list_email_sync_jobs(EmailSyncStatus::Pending, 1, Some(3))
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, old.id);
    }

    #[test]
    fn test_update_progress_stamps_last_synced_at() {
        let store = InMemoryJobStore::new();
        let job = store
            .create_email_sync_job("acc-1", SyncType::Initial)
            .unwrap();
        let before = Utc::now();

        store.update_email_progress(&job.id, 50, Some("tok1")).unwrap();

        let current = store.get_email_sync_job(&job.id).unwrap().unwrap();
        assert_eq!(current.emails_fetched, 50);
        assert_eq!(current.page_token.as_deref(), Some("tok1"));
        assert!(current.last_synced_at.unwrap() >= before);
    }

    #[test]
    fn test_update_tokens() {
        let store = InMemoryJobStore::new();
        store.upsert_account(Account::new("acc-1", "user-1")).unwrap();
        let expires = Utc::now() + Duration::hours(1);

        store.update_tokens("acc-1", "at", "rt", expires).unwrap();

        let account = store.get_account("acc-1").unwrap().unwrap();
        assert_eq!(account.access_token.as_deref(), Some("at"));
        assert_eq!(account.access_token_expires_at, Some(expires));
        assert!(store.update_tokens("missing", "at", "rt", expires).is_err());
    }
}
