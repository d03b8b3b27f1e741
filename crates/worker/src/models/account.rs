//! Linked Gmail account with its OAuth tokens

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A linked account row
///
/// Written by the sign-up flow outside the watcher. The watcher only reads
/// it, and writes back refreshed access tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// Owning user
    pub user_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Tokens expiring within this window are refreshed ahead of time
    pub const EXPIRY_SKEW_SECS: i64 = 300;

    /// Create an account without tokens
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            access_token: None,
            refresh_token: None,
            access_token_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach OAuth tokens
    pub fn with_tokens(
        mut self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.access_token = Some(access_token.into());
        self.refresh_token = Some(refresh_token.into());
        self.access_token_expires_at = expires_at;
        self
    }

    /// Whether the access token must be refreshed before use at `now`.
    ///
    /// A token without a known expiry is treated as expired.
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.access_token_expires_at {
            Some(expires_at) => now + Duration::seconds(Self::EXPIRY_SKEW_SECS) >= expires_at,
            None => true,
        }
    }
}
