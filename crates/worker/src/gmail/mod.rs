//! Gmail API integration
//!
//! This module provides:
//! - the [`MailApi`] seam the email processor talks to
//! - [`GmailClient`], its `ureq` implementation (list + token refresh)
//! - query construction for initial and incremental windows

mod client;
mod query;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub use client::{GmailClient, TokenRejectedError};
pub use query::{BASE_QUERY, build_query};

/// A refreshed OAuth access token
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Google may rotate the refresh token; otherwise the old one is kept
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// The two Gmail calls the watcher needs
pub trait MailApi: Send + Sync {
    /// List one page of message references matching `query`, newest first
    fn list_messages(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<api::ListMessagesResponse>;

    /// Exchange a refresh token for a new access token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken>;
}

/// Gmail API response types
pub mod api {
    use serde::Deserialize;

    /// Response from listing messages
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    impl ListMessagesResponse {
        /// Number of message references on this page
        pub fn len(&self) -> usize {
            self.messages.as_ref().map_or(0, Vec::len)
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Token endpoint response
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub refresh_token: Option<String>,
        pub expires_in: Option<u64>,
        #[allow(dead_code)]
        pub token_type: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::api::*;

    #[test]
    fn test_parse_list_response() {
        let json = r#"{
            "messages": [
                { "id": "m1", "threadId": "t1" },
                { "id": "m2", "threadId": "t1" }
            ],
            "nextPageToken": "tok1",
            "resultSizeEstimate": 120
        }"#;

        let page: ListMessagesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.next_page_token.as_deref(), Some("tok1"));
    }

    #[test]
    fn test_parse_empty_list_response() {
        let page: ListMessagesResponse =
            serde_json::from_str(r#"{ "resultSizeEstimate": 0 }"#).unwrap();
        assert!(page.is_empty());
        assert!(page.next_page_token.is_none());
    }
}
