//! Gmail page fetching for email sync jobs

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;

use super::{EmailPage, EmailPageProcessor};
use crate::config::WatcherConfig;
use crate::gmail::{MailApi, TokenRejectedError, build_query};
use crate::models::{Account, EmailSyncJob};
use crate::storage::AccountStore;

/// Lists inbox message references from Gmail, one page per call
pub struct GmailEmailProcessor {
    accounts: Arc<dyn AccountStore>,
    gmail: Arc<dyn MailApi>,
    max_emails_per_account: u32,
    emails_per_page: u32,
    initial_sync_days: u32,
}

impl GmailEmailProcessor {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        gmail: Arc<dyn MailApi>,
        config: &WatcherConfig,
    ) -> Self {
        Self {
            accounts,
            gmail,
            max_emails_per_account: config.max_emails_per_account,
            emails_per_page: config.emails_per_page,
            initial_sync_days: config.initial_sync_days,
        }
    }

    /// Return a usable access token, refreshing and persisting it if needed
    fn access_token(&self, account: &Account) -> Result<String> {
        let now = Utc::now();

        if let Some(token) = &account.access_token
            && !account.token_expired(now)
        {
            return Ok(token.clone());
        }

        let refresh_token = account
            .refresh_token
            .as_deref()
            .with_context(|| format!("Account {} has no refresh token", account.id))?;

        info!("[EMAIL] Refreshing access token for account {}", account.id);
        let refreshed = match self.gmail.refresh_access_token(refresh_token) {
            Ok(refreshed) => refreshed,
            Err(e) => {
                if e.downcast_ref::<TokenRejectedError>().is_some() {
                    warn!(
                        "[EMAIL] Google rejected the refresh token for account {}, the account must be re-linked",
                        account.id
                    );
                }
                return Err(e.context(format!("Failed to refresh token for account {}", account.id)));
            }
        };

        self.accounts.update_tokens(
            &account.id,
            &refreshed.access_token,
            &refreshed.refresh_token,
            refreshed.expires_at,
        )?;

        Ok(refreshed.access_token)
    }
}

impl EmailPageProcessor for GmailEmailProcessor {
    fn process_email_page(&self, job: &EmailSyncJob) -> Result<EmailPage> {
        if job.emails_fetched >= self.max_emails_per_account {
            return Ok(EmailPage::new(job.emails_fetched, None));
        }
        let remaining = self.max_emails_per_account - job.emails_fetched;
        let batch = self.emails_per_page.min(remaining);

        let account = self
            .accounts
            .get_account(&job.account_id)?
            .with_context(|| format!("Account {} not found", job.account_id))?;
        let access_token = self.access_token(&account)?;

        let query = build_query(
            job.sync_type,
            job.last_synced_at,
            self.initial_sync_days,
            Utc::now(),
        );

        let page = self
            .gmail
            .list_messages(&access_token, &query, batch, job.page_token.as_deref())
            .with_context(|| format!("Failed to list messages for account {}", job.account_id))?;

        let fetched = u32::try_from(page.len()).unwrap_or(u32::MAX).min(batch);
        let emails_fetched = job.emails_fetched + fetched;
        let page_token = page.next_page_token.filter(|token| !token.is_empty());

        debug!(
            "[EMAIL] Job {}: fetched {} messages ({} total, more pages: {})",
            job.id,
            fetched,
            emails_fetched,
            page_token.is_some()
        );

        Ok(EmailPage::new(emails_fetched, page_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::RefreshedToken;
    use crate::gmail::api::{ListMessagesResponse, MessageRef};
    use crate::storage::InMemoryJobStore;
    use chrono::Duration;
    use std::sync::Mutex;

    /// Records calls and serves a fixed page
    struct FakeGmail {
        page_size: usize,
        next_page_token: Option<String>,
        calls: Mutex<Vec<(String, String, u32, Option<String>)>>,
        refreshes: Mutex<u32>,
        reject_refresh: bool,
    }

    impl FakeGmail {
        fn new(page_size: usize, next_page_token: Option<&str>) -> Self {
            Self {
                page_size,
                next_page_token: next_page_token.map(str::to_string),
                calls: Mutex::new(Vec::new()),
                refreshes: Mutex::new(0),
                reject_refresh: false,
            }
        }

        fn rejecting_refresh(mut self) -> Self {
            self.reject_refresh = true;
            self
        }
    }

    impl MailApi for FakeGmail {
        fn list_messages(
            &self,
            access_token: &str,
            query: &str,
            max_results: u32,
            page_token: Option<&str>,
        ) -> Result<ListMessagesResponse> {
            self.calls.lock().unwrap().push((
                access_token.to_string(),
                query.to_string(),
                max_results,
                page_token.map(str::to_string),
            ));

            let messages = (0..self.page_size.min(max_results as usize))
                .map(|i| MessageRef {
                    id: format!("m{}", i),
                    thread_id: format!("t{}", i),
                })
                .collect();

            Ok(ListMessagesResponse {
                messages: Some(messages),
                next_page_token: self.next_page_token.clone(),
                result_size_estimate: None,
            })
        }

        fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken> {
            *self.refreshes.lock().unwrap() += 1;
            if self.reject_refresh {
                return Err(TokenRejectedError { status: 400 }.into());
            }
            Ok(RefreshedToken {
                access_token: "fresh-token".to_string(),
                refresh_token: refresh_token.to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }
    }

    fn setup(gmail: FakeGmail, config: &WatcherConfig) -> (Arc<InMemoryJobStore>, Arc<FakeGmail>, GmailEmailProcessor) {
        let store = Arc::new(InMemoryJobStore::new());
        store
            .upsert_account(Account::new("acc-1", "user-1").with_tokens(
                "valid-token",
                "refresh",
                Some(Utc::now() + Duration::hours(1)),
            ))
            .unwrap();

        let gmail = Arc::new(gmail);
        let processor = GmailEmailProcessor::new(store.clone(), gmail.clone(), config);
        (store, gmail, processor)
    }

    #[test]
    fn test_page_advances_count_and_token() {
        let (_store, gmail, processor) = setup(FakeGmail::new(50, Some("tok1")), &WatcherConfig::default());

        let page = processor
            .process_email_page(&EmailSyncJob::initial("acc-1"))
            .unwrap();

        assert_eq!(page, EmailPage::new(50, Some("tok1".to_string())));
        let calls = gmail.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "valid-token");
        assert!(calls[0].1.starts_with("in:inbox -in:spam after:"));
        assert_eq!(calls[0].2, 50);
        assert_eq!(calls[0].3, None);
    }

    #[test]
    fn test_page_size_limited_by_remaining_cap() {
        let config = WatcherConfig {
            max_emails_per_account: 120,
            ..WatcherConfig::default()
        };
        let (_store, gmail, processor) = setup(FakeGmail::new(50, Some("tok3")), &config);

        let job = EmailSyncJob::initial("acc-1").with_progress(100, Some("tok2"));
        let page = processor.process_email_page(&job).unwrap();

        assert_eq!(page.emails_fetched, 120);
        let calls = gmail.calls.lock().unwrap();
        assert_eq!(calls[0].2, 20);
        assert_eq!(calls[0].3.as_deref(), Some("tok2"));
    }

    #[test]
    fn test_cap_reached_skips_gmail() {
        let config = WatcherConfig {
            max_emails_per_account: 100,
            ..WatcherConfig::default()
        };
        let (_store, gmail, processor) = setup(FakeGmail::new(50, Some("tok")), &config);

        let job = EmailSyncJob::initial("acc-1").with_progress(100, Some("tok2"));
        let page = processor.process_email_page(&job).unwrap();

        assert_eq!(page, EmailPage::new(100, None));
        assert!(gmail.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_page_token_means_exhausted() {
        let (_store, _gmail, processor) = setup(FakeGmail::new(3, Some("")), &WatcherConfig::default());

        let page = processor
            .process_email_page(&EmailSyncJob::initial("acc-1"))
            .unwrap();
        assert_eq!(page, EmailPage::new(3, None));
    }

    #[test]
    fn test_expired_token_is_refreshed_and_persisted() {
        let (store, gmail, processor) = setup(FakeGmail::new(1, None), &WatcherConfig::default());
        store
            .upsert_account(Account::new("acc-1", "user-1").with_tokens(
                "stale-token",
                "refresh",
                Some(Utc::now() + Duration::seconds(60)),
            ))
            .unwrap();

        processor
            .process_email_page(&EmailSyncJob::initial("acc-1"))
            .unwrap();

        assert_eq!(*gmail.refreshes.lock().unwrap(), 1);
        assert_eq!(gmail.calls.lock().unwrap()[0].0, "fresh-token");
        let account = store.get_account("acc-1").unwrap().unwrap();
        assert_eq!(account.access_token.as_deref(), Some("fresh-token"));
        assert!(!account.token_expired(Utc::now()));
    }

    #[test]
    fn test_rejected_refresh_token_fails_the_page() {
        let (store, gmail, processor) = setup(
            FakeGmail::new(1, None).rejecting_refresh(),
            &WatcherConfig::default(),
        );
        store
            .upsert_account(Account::new("acc-1", "user-1").with_tokens(
                "stale-token",
                "revoked",
                Some(Utc::now() - Duration::hours(1)),
            ))
            .unwrap();

        let err = processor
            .process_email_page(&EmailSyncJob::initial("acc-1"))
            .unwrap_err();

        let rejected = err.downcast_ref::<TokenRejectedError>().unwrap();
        assert_eq!(rejected.status, 400);
        assert!(format!("{:#}", err).contains("Failed to refresh token for account acc-1"));
        assert!(gmail.calls.lock().unwrap().is_empty());
        let account = store.get_account("acc-1").unwrap().unwrap();
        assert_eq!(account.access_token.as_deref(), Some("stale-token"));
    }

    #[test]
    fn test_missing_account_is_an_error() {
        let (_store, gmail, processor) = setup(FakeGmail::new(1, None), &WatcherConfig::default());

        assert!(
            processor
                .process_email_page(&EmailSyncJob::initial("ghost"))
                .is_err()
        );
        assert!(gmail.calls.lock().unwrap().is_empty());
    }
}
