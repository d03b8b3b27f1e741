//! Watcher configuration
//!
//! Settings are read from `watcher.json` in the kiwis config directory,
//! then overridden by environment variables, then validated. Gmail OAuth
//! client credentials load separately (file first, then environment).

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::{RetryMode, RetryPolicy};

/// Settings filename in the kiwis config directory
const SETTINGS_FILE: &str = "watcher.json";

/// Credentials filename in the kiwis config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Default database filename in the kiwis config directory
const DATABASE_FILE: &str = "watcher.sqlite";

/// Gmail caps `maxResults` per list call at 500
pub const GMAIL_MAX_PAGE_SIZE: u32 = 500;

/// Scheduler, retry, and ingestion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between scheduler ticks
    pub poll_interval_secs: u64,
    /// Attempt bound used by every bounded retry policy
    pub max_retries: u32,
    /// How long the binary waits for the loop to stop after a signal
    pub shutdown_timeout_secs: u64,
    /// Initial sync stops after this many emails
    pub max_emails_per_account: u32,
    pub emails_per_page: u32,
    /// Initial sync window
    pub initial_sync_days: u32,
    /// Per-bucket cap on account jobs per tick (Pending and Failed each)
    pub account_batch_size: usize,
    pub account_retry: RetryMode,
    pub email_retry: RetryMode,
    /// SQLite file; defaults to `watcher.sqlite` in the config directory
    pub database_path: Option<PathBuf>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_retries: 3,
            shutdown_timeout_secs: 30,
            max_emails_per_account: 10_000,
            emails_per_page: 50,
            initial_sync_days: 365,
            account_batch_size: 5,
            account_retry: RetryMode::Unbounded,
            email_retry: RetryMode::Bounded,
            database_path: None,
        }
    }
}

impl WatcherConfig {
    /// Load settings file (if any), apply environment overrides, validate
    pub fn load() -> Result<Self> {
        let mut cfg = config::load_json_if_exists::<Self>(SETTINGS_FILE)?.unwrap_or_default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `KIWIS_*` / `DATABASE_PATH` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "KIWIS_POLL_INTERVAL_SECS", &mut self.poll_interval_secs)?;
        override_with(&lookup, "KIWIS_MAX_RETRIES", &mut self.max_retries)?;
        override_with(&lookup, "KIWIS_SHUTDOWN_TIMEOUT_SECS", &mut self.shutdown_timeout_secs)?;
        override_with(
            &lookup,
            "KIWIS_MAX_EMAILS_PER_ACCOUNT",
            &mut self.max_emails_per_account,
        )?;
        override_with(&lookup, "KIWIS_EMAILS_PER_PAGE", &mut self.emails_per_page)?;
        override_with(&lookup, "KIWIS_INITIAL_SYNC_DAYS", &mut self.initial_sync_days)?;
        override_with(&lookup, "KIWIS_ACCOUNT_BATCH_SIZE", &mut self.account_batch_size)?;

        if let Some(mode) = lookup("KIWIS_ACCOUNT_RETRY") {
            self.account_retry = parse_retry_mode("KIWIS_ACCOUNT_RETRY", &mode)?;
        }
        if let Some(mode) = lookup("KIWIS_EMAIL_RETRY") {
            self.email_retry = parse_retry_mode("KIWIS_EMAIL_RETRY", &mode)?;
        }
        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        ensure!(
            (1..=GMAIL_MAX_PAGE_SIZE).contains(&self.emails_per_page),
            "emails_per_page must be between 1 and {}",
            GMAIL_MAX_PAGE_SIZE
        );
        ensure!(self.max_emails_per_account > 0, "max_emails_per_account must be positive");
        ensure!(self.account_batch_size > 0, "account_batch_size must be positive");
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn account_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.account_retry, self.max_retries)
    }

    pub fn email_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.email_retry, self.max_retries)
    }

    /// The configured database path, or the default inside the config dir
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path(DATABASE_FILE).context("Could not determine config directory"),
        }
    }
}

fn override_with<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
    }
    Ok(())
}

fn parse_retry_mode(key: &str, raw: &str) -> Result<RetryMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "bounded" => Ok(RetryMode::Bounded),
        "unbounded" => Ok(RetryMode::Unbounded),
        other => bail!("Invalid value for {}: {:?} (expected bounded or unbounded)", key, other),
    }
}

/// OAuth client credentials used to refresh account access tokens
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load from `google-credentials.json`, falling back to the environment
    pub fn load() -> Result<Self> {
        match config::load_json_if_exists::<GoogleCredentialFile>(CREDENTIALS_FILE)? {
            Some(file) => Self::from_credential_file(file),
            None => Self::from_env(),
        }
    }

    /// Where [`GmailCredentials::load`] looks for the credentials file
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }

    /// Parse credentials from JSON (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let file: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(file)
    }

    /// Read `GMAIL_CLIENT_ID` / `GMAIL_CLIENT_SECRET`
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;
        Ok(Self {
            client_id,
            client_secret,
        })
    }

    fn from_credential_file(file: GoogleCredentialFile) -> Result<Self> {
        // Desktop ("installed") and server ("web") clients carry the same fields
        let creds = file
            .installed
            .or(file.web)
            .context("Credentials file missing 'installed' or 'web' section")?;
        Ok(Self {
            client_id: creds.client_id,
            client_secret: creds.client_secret,
        })
    }
}
