//! Job coordinators
//!
//! One coordinator per job kind. Each selects ready jobs from the
//! [`JobStore`](crate::storage::JobStore), hands them to its processor, and
//! records the outcome through validated status transitions.
//!
//! Errors returned from a coordinator are either invariant violations
//! (see [`crate::state::is_invariant_violation`]) or storage failures that
//! prevented bookkeeping. Processor failures never escape; they become
//! recorded transitions with `last_error`.

mod account;
mod email;

pub use account::{AccountJobOutcome, AccountPassStats, AccountSyncCoordinator};
pub use email::{
    EmailJobOutcome, EmailSyncCoordinator, Termination, create_initial_email_sync_job,
    termination,
};

/// Page size used when draining interrupted jobs at startup
const RECOVERY_BATCH: usize = 100;

/// Error text recorded on account jobs found mid-flight at startup
pub const INTERRUPTED_ERROR: &str = "interrupted before completion";
