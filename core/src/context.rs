//! Per-call cancellation and deadlines.
//!
//! # Design
//! Calls block the invoking thread, so cancellation has to come from another
//! thread. `CancelToken` is a shared flag behind a condition variable: the
//! backoff wait parks on it and wakes the moment `cancel` is called instead
//! of sleeping out the full interval. The same condition variable lets the
//! client wait for an in-flight request and give up on it when cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Cloneable handle that cancels every call sharing it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Block for up to `timeout`. Returns `true` if the token was cancelled
    /// before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            if self
                .inner
                .signal
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }

    /// Wake every thread parked on this token without cancelling it.
    pub(crate) fn notify(&self) {
        let _cancelled = self.inner.cancelled.lock();
        self.inner.signal.notify_all();
    }

    /// Block until `ready` yields a value, the token is cancelled, or
    /// `deadline` passes. Producers must call `notify` after making a value
    /// available. Cancellation wins over a value that is already there.
    pub(crate) fn wait_for<T>(
        &self,
        deadline: Option<Instant>,
        mut ready: impl FnMut() -> Option<T>,
    ) -> Result<T> {
        let mut cancelled = self.inner.cancelled.lock();
        loop {
            if *cancelled {
                return Err(Error::Cancelled);
            }
            if let Some(value) = ready() {
                return Ok(value);
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .signal
                        .wait_until(&mut cancelled, deadline)
                        .timed_out()
                    {
                        if *cancelled {
                            return Err(Error::Cancelled);
                        }
                        return ready().ok_or(Error::DeadlineExceeded);
                    }
                }
                None => self.inner.signal.wait(&mut cancelled),
            }
        }
    }
}

/// Cancellation token plus optional deadline for one logical call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancelToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the call should not continue.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.is_expired() {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }
}
