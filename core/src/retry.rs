//! Retry policy and the pluggable backoff clock.
//!
//! # Design
//! The policy is a pure function from (attempt counter, failure) to a
//! decision; it holds no per-call state, so one `RetryPolicy` is shared by
//! every concurrent call. The client owns the loop:
//!
//! ```text
//! Attempting --ok--------------------------------> Success
//!     |--permanent failure-----------------------> PermanentFailure
//!     |--retriable, counter == max_retries-------> ExhaustedFailure
//!     `--retriable, counter <  max_retries--> WaitingToRetry --(timer)--> Attempting
//! ```
//!
//! Waiting goes through a `Timer` so tests can resolve waits instantly.

use std::fmt;
use std::time::Duration;

use crate::context::CallContext;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 6;
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(64);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Exponential backoff with a bounded number of retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means a single attempt.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then attempt again.
    RetryAfter(Duration),
    /// The failure will not go away by retrying.
    Permanent,
    /// The failure was transient but the retry budget is spent.
    Exhausted,
}

impl RetryPolicy {
    /// A policy that performs exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Backoff before retry number `attempt + 1`, `attempt` counting from 0.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let initial = self.initial_interval.as_secs_f64();
        let cap = self.max_interval.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = initial * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay >= cap {
            self.max_interval
        } else {
            Duration::from_secs_f64(delay.max(0.0))
        }
    }

    /// Decide how to proceed after attempt `attempt` (from 0) failed with `err`.
    pub fn decide(&self, attempt: u32, err: &Error) -> RetryDecision {
        if !err.is_retriable() {
            RetryDecision::Permanent
        } else if attempt >= self.max_retries {
            RetryDecision::Exhausted
        } else {
            RetryDecision::RetryAfter(self.backoff(attempt))
        }
    }
}

/// Clock used to wait between attempts.
///
/// Implementations block for `duration` unless `ctx` is cancelled first, in
/// which case they return `Error::Cancelled` promptly. The client never asks
/// to wait past the context's deadline.
pub trait Timer: Send + Sync + fmt::Debug {
    fn wait(&self, duration: Duration, ctx: &CallContext) -> Result<()>;
}

/// Real-time timer that parks on the context's cancel token.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimer;

impl Timer for SystemTimer {
    fn wait(&self, duration: Duration, ctx: &CallContext) -> Result<()> {
        if ctx.cancel_token().wait_timeout(duration) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
