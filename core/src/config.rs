//! Client configuration.
//!
//! A `ClientConfig` is built once and shared read-only by every call made
//! through a `Client`. `Default` gives a usable fallback (no token, default
//! endpoint); `from_env` picks values up from the process environment.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, SystemTimer, Timer};

pub const DEFAULT_BASE_URL: &str = "https://api.turbopuffer.com";

pub const ENV_API_TOKEN: &str = "TPUF_API_TOKEN";
pub const ENV_BASE_URL: &str = "TPUF_BASE_URL";
pub const ENV_MAX_RETRIES: &str = "TPUF_MAX_RETRIES";

#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: String,
    pub retry: RetryPolicy,
    /// Gzip request bodies and ask for gzip responses.
    pub gzip: bool,
    /// Upper bound for a single attempt, on top of any call deadline.
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
    pub timer: Arc<dyn Timer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: String::new(),
            retry: RetryPolicy::default(),
            gzip: false,
            request_timeout: None,
            user_agent: format!("tpuf-rust/{}", env!("CARGO_PKG_VERSION")),
            timer: Arc::new(SystemTimer),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .field("retry", &self.retry)
            .field("gzip", &self.gzip)
            .field("request_timeout", &self.request_timeout)
            .field("user_agent", &self.user_agent)
            .field("timer", &self.timer)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            ..Self::default()
        }
    }

    /// Read `TPUF_API_TOKEN` (required), `TPUF_BASE_URL` and
    /// `TPUF_MAX_RETRIES` (`0` disables retries).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_token = lookup(ENV_API_TOKEN)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Validation(format!("{ENV_API_TOKEN} is not set")))?;

        let mut config = Self::new(api_token);
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            config.base_url = base_url;
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            let max_retries = raw.trim().parse::<u32>().map_err(|e| {
                Error::Validation(format!("{ENV_MAX_RETRIES}={raw:?} is not a retry count: {e}"))
            })?;
            config.retry.max_retries = max_retries;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_retry_disabled(mut self) -> Self {
        self.retry.max_retries = 0;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }
}
