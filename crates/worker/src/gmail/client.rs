//! Gmail API HTTP client
//!
//! Lists message references and refreshes OAuth tokens.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use super::api::{ListMessagesResponse, TokenResponse};
use super::{MailApi, RefreshedToken};
use crate::config::{GMAIL_MAX_PAGE_SIZE, GmailCredentials};

/// Error indicating Google rejected a refresh token
#[derive(Debug, thiserror::Error)]
#[error("Refresh token rejected by Google (HTTP {status})")]
pub struct TokenRejectedError {
    pub status: u16,
}

/// Gmail API client for the watcher
pub struct GmailClient {
    agent: ureq::Agent,
    credentials: GmailCredentials,
}

impl GmailClient {
    /// Gmail messages endpoint for the authenticated user
    const MESSAGES_URL: &'static str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Per-request timeout
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Lifetime assumed when the token endpoint omits `expires_in`
    const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

    /// Create a new Gmail client
    pub fn new(credentials: GmailCredentials) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Self::REQUEST_TIMEOUT))
            .build()
            .into();

        Self { agent, credentials }
    }

    fn list_url(query: &str, max_results: u32, page_token: Option<&str>) -> String {
        let mut url = format!(
            "{}?maxResults={}&q={}",
            Self::MESSAGES_URL,
            max_results.clamp(1, GMAIL_MAX_PAGE_SIZE),
            urlencoding::encode(query)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        url
    }
}

impl MailApi for GmailClient {
    fn list_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let url = Self::list_url(query, max_results, page_token);

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .context("Failed to send list messages request")?;

        let list: ListMessagesResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse list messages response")?;

        Ok(list)
    }

    fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken> {
        let response = self.agent.post(Self::TOKEN_URL).send_form([
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ]);

        let response = match response {
            Ok(resp) => resp,
            Err(ureq::Error::StatusCode(status @ (400 | 401))) => {
                return Err(TokenRejectedError { status }.into());
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to refresh access token")),
        };

        let token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        let lifetime = token
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .unwrap_or(Self::DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(RefreshedToken {
            access_token: token.access_token,
            // Preserve the refresh token if not returned
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        })
    }
}
