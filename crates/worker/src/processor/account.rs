//! Account onboarding

use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;

use super::AccountProcessor;
use crate::storage::AccountStore;

/// Checks that a newly linked account is usable for mail sync
///
/// Onboarding succeeds once the account row exists and carries an OAuth
/// access token. The coordinator then queues its initial email sync.
pub struct OnboardingProcessor {
    accounts: Arc<dyn AccountStore>,
}

impl OnboardingProcessor {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }
}

impl AccountProcessor for OnboardingProcessor {
    fn process_account(&self, account_id: &str) -> Result<()> {
        let account = self
            .accounts
            .get_account(account_id)?
            .with_context(|| format!("Account {} not found", account_id))?;

        if account.access_token.is_none() {
            anyhow::bail!("Account {} missing access token", account_id);
        }

        debug!("[ONBOARD] Account {} ready for mail sync", account_id);
        Ok(())
    }
}
