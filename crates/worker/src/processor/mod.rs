//! Per-job business logic invoked by the coordinators
//!
//! Coordinators own job bookkeeping (status, attempts, retries). A processor
//! only does the work for one job and reports success or an error.

mod account;
mod email;

use anyhow::Result;

use crate::models::EmailSyncJob;

pub use account::OnboardingProcessor;
pub use email::GmailEmailProcessor;

/// Onboards one account
pub trait AccountProcessor: Send + Sync {
    fn process_account(&self, account_id: &str) -> Result<()>;
}

/// Result of fetching one page for an email sync job
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EmailPage {
    /// Cumulative count for the job, including this page
    pub emails_fetched: u32,
    /// Token for the next page; `None` when no further page exists
    pub page_token: Option<String>,
}

impl EmailPage {
    pub fn new(emails_fetched: u32, page_token: Option<String>) -> Self {
        Self {
            emails_fetched,
            page_token,
        }
    }
}

/// Fetches one page of mail for an email sync job
pub trait EmailPageProcessor: Send + Sync {
    /// Fetch the page after `job.page_token`, never pushing the cumulative
    /// count past the configured cap.
    fn process_email_page(&self, job: &EmailSyncJob) -> Result<EmailPage>;
}
