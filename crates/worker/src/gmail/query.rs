//! Gmail search query construction
//!
//! Gmail lists matching messages newest first, so recent mail surfaces on
//! the first pages even if a backfill is later interrupted.

use chrono::{DateTime, Duration, Utc};

use crate::models::SyncType;

/// Received mail only, spam excluded
pub const BASE_QUERY: &str = "in:inbox -in:spam";

/// Build the search query for one page of a job.
///
/// Initial jobs cover the last `initial_sync_days`; incremental and webhook
/// jobs cover mail after `last_synced_at` (everything when never synced).
pub fn build_query(
    sync_type: SyncType,
    last_synced_at: Option<DateTime<Utc>>,
    initial_sync_days: u32,
    now: DateTime<Utc>,
) -> String {
    let after = match sync_type {
        SyncType::Initial => Some(now - Duration::days(i64::from(initial_sync_days))),
        SyncType::Incremental | SyncType::Webhook => last_synced_at,
    };

    match after {
        Some(after) => format!("{} after:{}", BASE_QUERY, after.format("%Y/%m/%d")),
        None => BASE_QUERY.to_string(),
    }
}
