//! Retry decision after a failed processing attempt

use serde::{Deserialize, Serialize};

/// How failures of one job kind are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Give up once `attempts >= max_retries`
    #[default]
    Bounded,
    /// Retry forever; an operator has to intervene to stop the job
    Unbounded,
}

/// Outcome of [`RetryPolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Exhausted,
}

/// Pure retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Bounded { max_retries: u32 },
    Unbounded,
}

impl RetryPolicy {
    pub fn new(mode: RetryMode, max_retries: u32) -> Self {
        match mode {
            RetryMode::Bounded => RetryPolicy::Bounded { max_retries },
            RetryMode::Unbounded => RetryPolicy::Unbounded,
        }
    }

    /// Decide what to do after a failure, given the attempt count that
    /// already includes the attempt that just failed.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        match *self {
            RetryPolicy::Bounded { max_retries } if attempts >= max_retries => {
                RetryDecision::Exhausted
            }
            _ => RetryDecision::Retry,
        }
    }

    /// Failed jobs at or above this attempt count are exhausted and must not
    /// be selected again. `None` when every failed job stays selectable.
    pub fn attempts_ceiling(&self) -> Option<u32> {
        match *self {
            RetryPolicy::Bounded { max_retries } => Some(max_retries),
            RetryPolicy::Unbounded => None,
        }
    }
}
