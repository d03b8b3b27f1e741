//! Email sync jobs, one page per tick

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;

use super::RECOVERY_BATCH;
use crate::models::{EmailSyncJob, EmailSyncStatus, SyncType};
use crate::processor::{EmailPage, EmailPageProcessor};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::is_invariant_violation;
use crate::storage::JobStore;

/// Where a job stands after a successful page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No further page and the per-account cap is reached
    CapReached,
    /// No further page below the cap
    MailboxExhausted,
    /// Another page is waiting; the job goes back to Pending
    MorePages,
}

impl Termination {
    /// Status the job moves to from Processing
    pub fn next_status(self) -> EmailSyncStatus {
        match self {
            Termination::CapReached | Termination::MailboxExhausted => EmailSyncStatus::Synced,
            Termination::MorePages => EmailSyncStatus::Pending,
        }
    }
}

/// Decide whether a job is done after a page
pub fn termination(emails_fetched: u32, page_token: Option<&str>, max_emails: u32) -> Termination {
    match page_token {
        None if emails_fetched >= max_emails => Termination::CapReached,
        None => Termination::MailboxExhausted,
        Some(_) => Termination::MorePages,
    }
}

/// How a single email job tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailJobOutcome {
    Advanced(Termination),
    /// `Retry` went back to Pending, `Exhausted` to Failed
    Failed(RetryDecision),
}

/// Queue the Initial email sync that follows account onboarding
pub fn create_initial_email_sync_job(store: &dyn JobStore, account_id: &str) -> Result<EmailSyncJob> {
    let job = store.create_email_sync_job(account_id, SyncType::Initial)?;
    info!(
        "[EMAIL] Queued initial sync job {} for account {}",
        job.id, account_id
    );
    Ok(job)
}

/// Advances email sync jobs one page at a time, least recently synced first
pub struct EmailSyncCoordinator {
    store: Arc<dyn JobStore>,
    processor: Arc<dyn EmailPageProcessor>,
    retry: RetryPolicy,
    max_emails_per_account: u32,
}

impl EmailSyncCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: Arc<dyn EmailPageProcessor>,
        retry: RetryPolicy,
        max_emails_per_account: u32,
    ) -> Self {
        Self {
            store,
            processor,
            retry,
            max_emails_per_account,
        }
    }

    pub fn create_initial_email_sync_job(&self, account_id: &str) -> Result<EmailSyncJob> {
        create_initial_email_sync_job(self.store.as_ref(), account_id)
    }

    /// The Pending job synced longest ago (never-synced first), else the
    /// retryable Failed job in the same order.
    pub fn select_next(&self) -> Result<Option<EmailSyncJob>> {
        let pending = self
            .store
            .list_email_sync_jobs(EmailSyncStatus::Pending, 1, None)?;
        if let Some(job) = pending.into_iter().next() {
            return Ok(Some(job));
        }

        let failed = self.store.list_email_sync_jobs(
            EmailSyncStatus::Failed,
            1,
            self.retry.attempts_ceiling(),
        )?;
        Ok(failed.into_iter().next())
    }

    /// Fetch one page for `job` and record the outcome
    pub fn process_one(&self, job: &EmailSyncJob) -> Result<EmailJobOutcome> {
        self.store
            .transition_email_sync_job(&job.id, EmailSyncStatus::Processing, None)?;

        if let Err(e) = self.store.increment_email_sync_attempts(&job.id) {
            if is_invariant_violation(&e) {
                return Err(e);
            }
            warn!("[EMAIL] Failed to count attempt for job {}: {:#}", job.id, e);
        }
        let attempts = job.attempts + 1;

        let result = self.processor.process_email_page(job).and_then(|page| {
            self.store.update_email_progress(
                &job.id,
                page.emails_fetched,
                page.page_token.as_deref(),
            )?;
            Ok(page)
        });

        match result {
            Ok(page) => self.record_page(job, &page),
            Err(e) if is_invariant_violation(&e) => Err(e),
            Err(e) => self.record_failure(job, attempts, &e),
        }
    }

    fn record_page(&self, job: &EmailSyncJob, page: &EmailPage) -> Result<EmailJobOutcome> {
        let outcome = termination(
            page.emails_fetched,
            page.page_token.as_deref(),
            self.max_emails_per_account,
        );
        self.store
            .transition_email_sync_job(&job.id, outcome.next_status(), None)?;

        match outcome {
            Termination::CapReached => info!(
                "[EMAIL] Job {} for account {} reached the {} email cap",
                job.id, job.account_id, self.max_emails_per_account
            ),
            Termination::MailboxExhausted => info!(
                "[EMAIL] Job {} for account {} synced ({} emails)",
                job.id, job.account_id, page.emails_fetched
            ),
            Termination::MorePages => debug!(
                "[EMAIL] Job {} for account {} at {} emails, more pages pending",
                job.id, job.account_id, page.emails_fetched
            ),
        }

        Ok(EmailJobOutcome::Advanced(outcome))
    }

    fn record_failure(
        &self,
        job: &EmailSyncJob,
        attempts: u32,
        err: &anyhow::Error,
    ) -> Result<EmailJobOutcome> {
        // Stamp last_synced_at so the job moves to the back of the round robin
        if let Err(e) = self.store.update_email_progress(
            &job.id,
            job.emails_fetched,
            job.page_token.as_deref(),
        ) {
            if is_invariant_violation(&e) {
                return Err(e);
            }
            warn!("[EMAIL] Failed to stamp job {} after error: {:#}", job.id, e);
        }

        let decision = self.retry.decide(attempts);
        let message = format!("{:#}", err);

        match decision {
            RetryDecision::Retry => {
                self.store.transition_email_sync_job(
                    &job.id,
                    EmailSyncStatus::Pending,
                    Some(&message),
                )?;
                warn!(
                    "[EMAIL] Job {} for account {} failed (attempt {}), will retry: {}",
                    job.id, job.account_id, attempts, message
                );
            }
            RetryDecision::Exhausted => {
                self.store.transition_email_sync_job(
                    &job.id,
                    EmailSyncStatus::Failed,
                    Some(&message),
                )?;
                error!(
                    "[EMAIL] Job {} for account {} failed after {} attempts, giving up: {}",
                    job.id, job.account_id, attempts, message
                );
            }
        }

        Ok(EmailJobOutcome::Failed(decision))
    }

    /// Advance the next job by one page. `None` when nothing is ready.
    pub fn run_pass(&self) -> Result<Option<EmailJobOutcome>> {
        match self.select_next()? {
            Some(job) => self.process_one(&job).map(Some),
            None => Ok(None),
        }
    }

    /// Return every job left in Processing by a previous run to Pending
    pub fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;

        loop {
            let jobs = self.store.list_email_sync_jobs(
                EmailSyncStatus::Processing,
                RECOVERY_BATCH,
                None,
            )?;
            if jobs.is_empty() {
                break;
            }

            for job in &jobs {
                self.store
                    .transition_email_sync_job(&job.id, EmailSyncStatus::Pending, None)?;
                warn!(
                    "[EMAIL] Job {} for account {} was interrupted, requeued",
                    job.id, job.account_id
                );
            }
            recovered += jobs.len();
        }

        Ok(recovered)
    }
}
