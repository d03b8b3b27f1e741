//! Worker crate - Background job orchestration for account and email sync
//!
//! This crate provides the watcher's platform-independent core:
//! - Domain models (AccountSyncJob, EmailSyncJob, Account)
//! - Per-kind status transition tables and retry policies
//! - Storage trait abstractions with SQLite and in-memory backends
//! - Gmail API client (message listing, token refresh)
//! - Coordinators that select, process, and record jobs
//! - A fixed-interval scheduler with cooperative shutdown
//!
//! All I/O is synchronous. The crate has no async runtime dependency.

pub mod config;
pub mod coordinator;
pub mod gmail;
pub mod models;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod storage;

pub use config::{GmailCredentials, WatcherConfig};
pub use coordinator::{
    AccountJobOutcome, AccountPassStats, AccountSyncCoordinator, EmailJobOutcome,
    EmailSyncCoordinator, Termination,
};
pub use gmail::{GmailClient, MailApi};
pub use models::{
    Account, AccountSyncJob, AccountSyncStatus, EmailSyncJob, EmailSyncStatus, JobId, JobKind,
    SyncType,
};
pub use processor::{
    AccountProcessor, EmailPage, EmailPageProcessor, GmailEmailProcessor, OnboardingProcessor,
};
pub use retry::{RetryDecision, RetryMode, RetryPolicy};
pub use scheduler::{PassReport, Scheduler};
pub use shutdown::ShutdownSignal;
pub use state::{IllegalTransition, JobNotFound, JobState, is_invariant_violation};
pub use storage::{AccountStore, InMemoryJobStore, JobStore, SqliteJobStore};
