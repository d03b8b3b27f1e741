//! Selection order shared by the store implementations
//!
//! The SQLite store expresses the same order in `ORDER BY` clauses; the
//! in-memory store sorts with these comparators.

use std::cmp::Ordering;

use crate::models::{AccountSyncJob, EmailSyncJob};

/// FIFO by creation time, id as tie breaker
pub fn account_fifo(a: &AccountSyncJob, b: &AccountSyncJob) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Round robin: never-synced first, then least recently progressed
pub fn email_round_robin(a: &EmailSyncJob, b: &EmailSyncJob) -> Ordering {
    // Option orders None before Some, which is exactly nulls-first.
    a.last_synced_at
        .cmp(&b.last_synced_at)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Whether a job passes the exhausted-retry filter
pub fn below_ceiling(attempts: u32, attempts_below: Option<u32>) -> bool {
    attempts_below.is_none_or(|ceiling| attempts < ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_never_synced_sorts_first() {
        let now = Utc::now();
        let synced = EmailSyncJob::initial("a").with_last_synced_at(now - Duration::days(30));
        let fresh = EmailSyncJob::initial("b").with_created_at(now + Duration::days(1));

        let mut jobs = vec![synced.clone(), fresh.clone()];
        jobs.sort_by(email_round_robin);
        assert_eq!(jobs[0].id, fresh.id);
        assert_eq!(jobs[1].id, synced.id);
    }

    #[test]
    fn test_least_recently_synced_first() {
        let now = Utc::now();
        let recent = EmailSyncJob::initial("a").with_last_synced_at(now);
        let older = EmailSyncJob::initial("b").with_last_synced_at(now - Duration::minutes(5));

        let mut jobs = vec![recent.clone(), older.clone()];
        jobs.sort_by(email_round_robin);
        assert_eq!(jobs[0].id, older.id);
    }

    #[test]
    fn test_account_fifo() {
        let now = Utc::now();
        let later = AccountSyncJob::new("a").with_created_at(now);
        let earlier = AccountSyncJob::new("b").with_created_at(now - Duration::seconds(1));

        let mut jobs = vec![later.clone(), earlier.clone()];
        jobs.sort_by(account_fifo);
        assert_eq!(jobs[0].id, earlier.id);
    }

    #[test]
    fn test_below_ceiling() {
        assert!(below_ceiling(100, None));
        assert!(below_ceiling(2, Some(3)));
        assert!(!below_ceiling(3, Some(3)));
    }
}
