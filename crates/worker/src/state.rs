//! Legal status transitions per job kind
//!
//! Stores validate every status write against these tables. A rejected
//! transition is a bug in the caller, never a user-facing condition, so it
//! surfaces as [`IllegalTransition`] and stops the scheduler.

use std::fmt::{Debug, Display};

use crate::models::{AccountSyncStatus, EmailSyncStatus, JobId, JobKind};

/// Status enum of a job kind, with its transition table
pub trait JobState: Copy + Eq + Debug + Display + Send + Sync + 'static {
    const KIND: JobKind;

    /// Destinations reachable from `self`
    fn next_states(self) -> &'static [Self];

    /// Whether a coordinator may pick a job in this status
    fn is_ready(self) -> bool;

    /// Whether the watcher never moves a job out of this status
    fn is_terminal(self) -> bool;

    /// Whether `processed_at` is set while a job sits in this status
    fn is_processed(self) -> bool;

    fn can_transition_to(self, next: Self) -> bool {
        self.next_states().contains(&next)
    }
}

impl JobState for AccountSyncStatus {
    const KIND: JobKind = JobKind::AccountSync;

    fn next_states(self) -> &'static [Self] {
        use AccountSyncStatus::*;
        match self {
            Pending => &[Processing],
            Processing => &[Completed, Failed],
            Failed => &[Processing],
            Completed => &[],
        }
    }

    fn is_ready(self) -> bool {
        matches!(self, AccountSyncStatus::Pending | AccountSyncStatus::Failed)
    }

    fn is_terminal(self) -> bool {
        self == AccountSyncStatus::Completed
    }

    fn is_processed(self) -> bool {
        matches!(self, AccountSyncStatus::Completed | AccountSyncStatus::Failed)
    }
}

impl JobState for EmailSyncStatus {
    const KIND: JobKind = JobKind::EmailSync;

    fn next_states(self) -> &'static [Self] {
        use EmailSyncStatus::*;
        match self {
            Pending => &[Processing],
            Processing => &[Synced, Failed, Pending],
            Failed => &[Processing],
            Synced | Completed => &[],
        }
    }

    fn is_ready(self) -> bool {
        matches!(self, EmailSyncStatus::Pending | EmailSyncStatus::Failed)
    }

    fn is_terminal(self) -> bool {
        matches!(self, EmailSyncStatus::Synced | EmailSyncStatus::Completed)
    }

    fn is_processed(self) -> bool {
        matches!(
            self,
            EmailSyncStatus::Synced | EmailSyncStatus::Completed | EmailSyncStatus::Failed
        )
    }
}

/// A status write outside the transition table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal {kind} transition for job {job_id}: {from} -> {to}")]
pub struct IllegalTransition {
    pub kind: JobKind,
    pub job_id: JobId,
    pub from: String,
    pub to: String,
}

/// An update addressed to a job that does not exist
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} job {job_id} not found")]
pub struct JobNotFound {
    pub kind: JobKind,
    pub job_id: JobId,
}

/// Check `from -> to` against the table for `S`.
pub fn validate_transition<S: JobState>(
    job_id: &JobId,
    from: S,
    to: S,
) -> Result<(), IllegalTransition> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(IllegalTransition {
            kind: S::KIND,
            job_id: job_id.clone(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Whether an error is a programming error that must not be retried
pub fn is_invariant_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<IllegalTransition>().is_some()
            || cause.downcast_ref::<JobNotFound>().is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_account_table() {
        use AccountSyncStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(Completed.next_states().is_empty());
    }

    #[test]
    fn test_email_table() {
        use EmailSyncStatus::*;
        assert!(Processing.can_transition_to(Pending));
        assert!(Processing.can_transition_to(Synced));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Pending.can_transition_to(Synced));
        assert!(!Synced.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Completed));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_ready_and_processed_are_disjoint_from_in_flight() {
        for status in AccountSyncStatus::ALL {
            let in_flight = matches!(
                status,
                AccountSyncStatus::Pending | AccountSyncStatus::Processing
            );
            assert_eq!(status.is_processed(), !in_flight, "{status}");
        }
        for status in EmailSyncStatus::ALL {
            let in_flight = matches!(status, EmailSyncStatus::Pending | EmailSyncStatus::Processing);
            assert_eq!(status.is_processed(), !in_flight, "{status}");
            assert!(!(status.is_ready() && status.is_terminal()));
        }
    }

    #[test]
    fn test_validate_transition_error() {
        let id = JobId::new("job-1");
        let err = validate_transition(&id, EmailSyncStatus::Synced, EmailSyncStatus::Pending)
            .unwrap_err();
        assert_eq!(err.kind, JobKind::EmailSync);
        assert_eq!(
            err.to_string(),
            "illegal email sync transition for job job-1: synced -> pending"
        );
    }

    #[test]
    fn test_invariant_violation_detected_through_context() {
        let err = anyhow::Error::new(JobNotFound {
            kind: JobKind::AccountSync,
            job_id: JobId::new("missing"),
        });
        let wrapped = Err::<(), _>(err).context("marking job completed").unwrap_err();
        assert!(is_invariant_violation(&wrapped));

        let transient = anyhow::anyhow!("connection reset");
        assert!(!is_invariant_violation(&transient));
    }
}
