//! Fixed-interval scheduler driving both coordinators
//!
//! Each pass runs the account coordinator (a small batch) and then the email
//! coordinator (exactly one page). Passes never overlap.

use anyhow::Result;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WatcherConfig;
use crate::coordinator::{
    AccountPassStats, AccountSyncCoordinator, EmailJobOutcome, EmailSyncCoordinator,
};
use crate::processor::{AccountProcessor, EmailPageProcessor};
use crate::shutdown::ShutdownSignal;
use crate::state::is_invariant_violation;
use crate::storage::JobStore;

/// What one scheduler pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// `None` if the account pass failed before processing anything
    pub accounts: Option<AccountPassStats>,
    /// `None` if no email job was ready or the email pass did not run
    pub email: Option<EmailJobOutcome>,
    /// Pass-level errors that were logged and skipped
    pub errors: usize,
}

/// Runs coordinator passes on a fixed interval until cancelled
pub struct Scheduler {
    accounts: AccountSyncCoordinator,
    emails: EmailSyncCoordinator,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        accounts: AccountSyncCoordinator,
        emails: EmailSyncCoordinator,
        poll_interval: Duration,
    ) -> Self {
        Self {
            accounts,
            emails,
            poll_interval,
        }
    }

    /// Wire both coordinators from configuration
    pub fn from_config(
        config: &WatcherConfig,
        store: Arc<dyn JobStore>,
        account_processor: Arc<dyn AccountProcessor>,
        email_processor: Arc<dyn EmailPageProcessor>,
    ) -> Self {
        let accounts = AccountSyncCoordinator::new(
            store.clone(),
            account_processor,
            config.account_retry_policy(),
            config.account_batch_size,
        );
        let emails = EmailSyncCoordinator::new(
            store,
            email_processor,
            config.email_retry_policy(),
            config.max_emails_per_account,
        );

        Self::new(accounts, emails, config.poll_interval())
    }

    /// Run one account pass followed by one email pass.
    ///
    /// Only invariant violations are returned as errors; anything else is
    /// logged and counted in the report.
    pub fn run_pass(&self, shutdown: &ShutdownSignal) -> Result<PassReport> {
        let mut report = PassReport::default();

        match self.accounts.run_pass(shutdown) {
            Ok(stats) => {
                if stats.selected > 0 {
                    info!(
                        "[SCHEDULER] Account pass: {} selected, {} completed, {} failed in {}ms",
                        stats.selected, stats.completed, stats.failed, stats.duration_ms
                    );
                }
                report.errors += stats.errors;
                report.accounts = Some(stats);
            }
            Err(e) if is_invariant_violation(&e) => return Err(e),
            Err(e) => {
                error!("[SCHEDULER] Account pass failed: {:#}", e);
                report.errors += 1;
            }
        }

        if shutdown.is_cancelled() {
            return Ok(report);
        }

        match self.emails.run_pass() {
            Ok(outcome) => report.email = outcome,
            Err(e) if is_invariant_violation(&e) => return Err(e),
            Err(e) => {
                error!("[SCHEDULER] Email pass failed: {:#}", e);
                report.errors += 1;
            }
        }

        Ok(report)
    }

    /// Requeue or fail jobs a previous run left in Processing
    pub fn recover_interrupted(&self) -> Result<(usize, usize)> {
        let accounts = self.accounts.recover_interrupted()?;
        let emails = self.emails.recover_interrupted()?;
        if accounts + emails > 0 {
            info!(
                "[SCHEDULER] Recovered {} account jobs and {} email jobs",
                accounts, emails
            );
        }
        Ok((accounts, emails))
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// The first pass starts immediately. Ticks missed while a pass overran
    /// are skipped. Returns an error only for invariant violations or a
    /// failed startup recovery.
    pub fn run(&self, shutdown: &ShutdownSignal) -> Result<()> {
        info!(
            "[SCHEDULER] Starting, polling every {}s",
            self.poll_interval.as_secs()
        );
        self.recover_interrupted()?;

        let mut next_tick = Instant::now();

        while !shutdown.is_cancelled() {
            let report = self.run_pass(shutdown)?;
            debug!("[SCHEDULER] Pass finished: {:?}", report);

            next_tick = next_deadline(next_tick, self.poll_interval, Instant::now());
            if shutdown.wait_until(next_tick) {
                break;
            }
        }

        info!("[SCHEDULER] Shutdown requested, stopped");
        Ok(())
    }
}

/// The first tick after `now` on the grid started at `previous`
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let mut next = previous + interval;
    if next <= now && !interval.is_zero() {
        let behind = now.duration_since(next);
        let skipped = behind.as_nanos() / interval.as_nanos() + 1;
        next += interval * skipped as u32;
    }
    next
}
