//! Account onboarding jobs

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;

use super::email::create_initial_email_sync_job;
use super::{INTERRUPTED_ERROR, RECOVERY_BATCH};
use crate::models::{AccountSyncJob, AccountSyncStatus};
use crate::processor::AccountProcessor;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::shutdown::ShutdownSignal;
use crate::state::is_invariant_violation;
use crate::storage::JobStore;

/// How a single account job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountJobOutcome {
    Completed,
    /// Recorded as Failed. `Exhausted` jobs are no longer selected.
    Failed(RetryDecision),
}

/// Statistics from one account pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccountPassStats {
    /// Jobs picked for this pass
    pub selected: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs whose bookkeeping failed
    pub errors: usize,
    /// Jobs left untouched because shutdown was requested
    pub skipped: usize,
    pub duration_ms: u64,
}

/// Drives account sync jobs from Pending/Failed to Completed
pub struct AccountSyncCoordinator {
    store: Arc<dyn JobStore>,
    processor: Arc<dyn AccountProcessor>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl AccountSyncCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: Arc<dyn AccountProcessor>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            processor,
            retry,
            batch_size,
        }
    }

    /// Pending jobs first, then retryable Failed jobs, each oldest first
    /// and each capped at `limit`.
    pub fn select_candidates(&self, limit: usize) -> Result<Vec<AccountSyncJob>> {
        let mut jobs = self
            .store
            .list_account_sync_jobs(AccountSyncStatus::Pending, limit, None)?;
        jobs.extend(self.store.list_account_sync_jobs(
            AccountSyncStatus::Failed,
            limit,
            self.retry.attempts_ceiling(),
        )?);
        Ok(jobs)
    }

    /// Onboard one account and record the outcome
    pub fn process_one(&self, job: &AccountSyncJob) -> Result<AccountJobOutcome> {
        self.store
            .transition_account_sync_job(&job.id, AccountSyncStatus::Processing, None)?;

        if let Err(e) = self.store.increment_account_sync_attempts(&job.id) {
            if is_invariant_violation(&e) {
                return Err(e);
            }
            warn!("[ACCOUNTS] Failed to count attempt for job {}: {:#}", job.id, e);
        }
        let attempts = job.attempts + 1;

        match self.processor.process_account(&job.account_id) {
            Ok(()) => {
                self.store
                    .transition_account_sync_job(&job.id, AccountSyncStatus::Completed, None)?;
                info!("[ACCOUNTS] Account {} onboarded", job.account_id);

                if let Err(e) = create_initial_email_sync_job(self.store.as_ref(), &job.account_id)
                {
                    warn!(
                        "[ACCOUNTS] Failed to queue initial email sync for account {}: {:#}",
                        job.account_id, e
                    );
                }

                Ok(AccountJobOutcome::Completed)
            }
            Err(err) => {
                let decision = self.retry.decide(attempts);
                let message = format!("{:#}", err);
                self.store.transition_account_sync_job(
                    &job.id,
                    AccountSyncStatus::Failed,
                    Some(&message),
                )?;

                match decision {
                    RetryDecision::Retry => warn!(
                        "[ACCOUNTS] Account {} failed (attempt {}), will retry: {}",
                        job.account_id, attempts, message
                    ),
                    RetryDecision::Exhausted => error!(
                        "[ACCOUNTS] Account {} failed after {} attempts, giving up: {}",
                        job.account_id, attempts, message
                    ),
                }

                Ok(AccountJobOutcome::Failed(decision))
            }
        }
    }

    /// Process one batch of candidates in order.
    ///
    /// Shutdown is checked before each job; a job already started always
    /// finishes. Invariant violations abort the pass.
    pub fn run_pass(&self, shutdown: &ShutdownSignal) -> Result<AccountPassStats> {
        let start = Instant::now();
        let mut stats = AccountPassStats::default();

        let jobs = self.select_candidates(self.batch_size)?;
        stats.selected = jobs.len();

        for (i, job) in jobs.iter().enumerate() {
            if shutdown.is_cancelled() {
                stats.skipped = jobs.len() - i;
                debug!("[ACCOUNTS] Shutdown requested, skipping {} jobs", stats.skipped);
                break;
            }

            match self.process_one(job) {
                Ok(AccountJobOutcome::Completed) => stats.completed += 1,
                Ok(AccountJobOutcome::Failed(_)) => stats.failed += 1,
                Err(e) if is_invariant_violation(&e) => return Err(e),
                Err(e) => {
                    error!("[ACCOUNTS] Failed to process job {}: {:#}", job.id, e);
                    stats.errors += 1;
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Fail every job left in Processing by a previous run
    pub fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;

        loop {
            let jobs = self.store.list_account_sync_jobs(
                AccountSyncStatus::Processing,
                RECOVERY_BATCH,
                None,
            )?;
            if jobs.is_empty() {
                break;
            }

            for job in &jobs {
                self.store.transition_account_sync_job(
                    &job.id,
                    AccountSyncStatus::Failed,
                    Some(INTERRUPTED_ERROR),
                )?;
                warn!(
                    "[ACCOUNTS] Job {} for account {} was interrupted, marked failed",
                    job.id, job.account_id
                );
            }
            recovered += jobs.len();
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryMode;
    use crate::state::IllegalTransition;
    use crate::storage::InMemoryJobStore;
    use chrono::{Duration, Utc};

    struct Succeeds;

    impl AccountProcessor for Succeeds {
        fn process_account(&self, _account_id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct Fails;

    impl AccountProcessor for Fails {
        fn process_account(&self, account_id: &str) -> Result<()> {
            anyhow::bail!("gmail unreachable for {}", account_id)
        }
    }

    fn coordinator(
        store: &Arc<InMemoryJobStore>,
        processor: impl AccountProcessor + 'static,
        retry: RetryPolicy,
    ) -> AccountSyncCoordinator {
        AccountSyncCoordinator::new(store.clone(), Arc::new(processor), retry, 5)
    }

    #[test]
    fn test_select_candidates_pending_then_failed() {
        let store = Arc::new(InMemoryJobStore::new());
        let base = Utc::now() - Duration::hours(1);

        let mut failed = AccountSyncJob::new("acc-failed").with_created_at(base);
        failed.status = AccountSyncStatus::Failed;
        failed.attempts = 1;
        store.insert_account_sync_job(failed);
        for i in 0..7 {
            store.insert_account_sync_job(
                AccountSyncJob::new(format!("acc-{}", i))
                    .with_created_at(base + Duration::minutes(i)),
            );
        }

        let coordinator = coordinator(&store, Succeeds, RetryPolicy::Unbounded);
        let jobs = coordinator.select_candidates(5).unwrap();

        let accounts: Vec<_> = jobs.iter().map(|j| j.account_id.as_str()).collect();
        assert_eq!(
            accounts,
            vec!["acc-0", "acc-1", "acc-2", "acc-3", "acc-4", "acc-failed"]
        );
    }

    #[test]
    fn test_success_completes_and_chains_initial_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create_account_sync_job("acc-1").unwrap();

        let outcome = coordinator(&store, Succeeds, RetryPolicy::Unbounded)
            .process_one(&job)
            .unwrap();
        assert_eq!(outcome, AccountJobOutcome::Completed);

        let job = store.get_account_sync_job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, AccountSyncStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert!(job.processed_at.is_some());

        let email_jobs = store.email_sync_jobs_for_account("acc-1");
        assert_eq!(email_jobs.len(), 1);
        assert_eq!(email_jobs[0].emails_fetched, 0);
        assert!(email_jobs[0].last_synced_at.is_none());
    }

    #[test]
    fn test_failure_records_error_chain() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create_account_sync_job("acc-1").unwrap();

        let outcome = coordinator(&store, Fails, RetryPolicy::Unbounded)
            .process_one(&job)
            .unwrap();
        assert_eq!(outcome, AccountJobOutcome::Failed(RetryDecision::Retry));

        let job = store.get_account_sync_job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, AccountSyncStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("gmail unreachable for acc-1"));
        assert!(job.processed_at.is_some());
        assert_eq!(store.count_email_sync_jobs(), 0);
    }

    #[test]
    fn test_bounded_policy_exhausts() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create_account_sync_job("acc-1").unwrap();
        let coordinator = coordinator(&store, Fails, RetryPolicy::new(RetryMode::Bounded, 2));

        let first = coordinator.process_one(&job).unwrap();
        assert_eq!(first, AccountJobOutcome::Failed(RetryDecision::Retry));

        let job = store.get_account_sync_job(&job.id).unwrap().unwrap();
        let second = coordinator.process_one(&job).unwrap();
        assert_eq!(second, AccountJobOutcome::Failed(RetryDecision::Exhausted));

        assert!(coordinator.select_candidates(5).unwrap().is_empty());
    }

    #[test]
    fn test_missing_job_is_invariant_violation() {
        let store = Arc::new(InMemoryJobStore::new());
        let ghost = AccountSyncJob::new("acc-1");

        let err = coordinator(&store, Succeeds, RetryPolicy::Unbounded)
            .process_one(&ghost)
            .unwrap_err();
        assert!(is_invariant_violation(&err));
    }

    #[test]
    fn test_completed_job_cannot_be_reprocessed() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create_account_sync_job("acc-1").unwrap();
        let coordinator = coordinator(&store, Succeeds, RetryPolicy::Unbounded);
        coordinator.process_one(&job).unwrap();

        let stale = store.get_account_sync_job(&job.id).unwrap().unwrap();
        let err = coordinator.process_one(&stale).unwrap_err();
        assert!(err.downcast_ref::<IllegalTransition>().is_some());
    }

    #[test]
    fn test_run_pass_stops_when_cancelled() {
        let store = Arc::new(InMemoryJobStore::new());
        store.create_account_sync_job("acc-1").unwrap();
        store.create_account_sync_job("acc-2").unwrap();

        let shutdown = ShutdownSignal::new();
        shutdown.cancel();

        let stats = coordinator(&store, Succeeds, RetryPolicy::Unbounded)
            .run_pass(&shutdown)
            .unwrap();
        assert_eq!(stats.selected, 2);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_recover_interrupted_fails_processing_jobs() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create_account_sync_job("acc-1").unwrap();
        store
            .transition_account_sync_job(&job.id, AccountSyncStatus::Processing, None)
            .unwrap();
        store.create_account_sync_job("acc-2").unwrap();

        let recovered = coordinator(&store, Succeeds, RetryPolicy::Unbounded)
            .recover_interrupted()
            .unwrap();
        assert_eq!(recovered, 1);

        let job = store.get_account_sync_job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, AccountSyncStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some(INTERRUPTED_ERROR));
    }
}
