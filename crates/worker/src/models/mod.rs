//! Domain models for sync jobs and linked accounts

mod account;
mod account_sync_job;
mod email_sync_job;
mod job;

pub use account::Account;
pub use account_sync_job::{AccountSyncJob, AccountSyncStatus};
pub use email_sync_job::{EmailSyncJob, EmailSyncStatus, SyncType};
pub use job::{JobId, JobKind, UnknownStatus};
