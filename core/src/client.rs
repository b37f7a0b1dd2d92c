//! Resilient request execution.
//!
//! # Design
//! `Client` pairs a read-only `ClientConfig` with a `Transport`. It carries
//! no mutable state between calls, so one instance can serve any number of
//! threads.
//!
//! `execute` is the single path every endpoint goes through:
//! 1. validate the URL and buffer the body (gzip-compressed once if enabled)
//!    into an immutable `HttpRequest`;
//! 2. send it from a helper thread while the caller parks on the
//!    `CallContext` (so a cancel abandons a hung request), decompress the
//!    response if it says gzip, and turn any non-200 status into a
//!    classified `Error`;
//! 3. ask the `RetryPolicy` what to do with a failure, waiting on the
//!    configured `Timer` between attempts.
//!
//! A 200 response is handed back as raw bytes; interpreting the payload is
//! the endpoint's job.

use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::compression::{self, GZIP};
use crate::config::ClientConfig;
use crate::context::{CallContext, CancelToken};
use crate::envelope::{error_from_response, HTTP_OK};
use crate::error::{Error, Result};
use crate::http::{
    HttpMethod, HttpRequest, HttpResponse, Transport, TransportError, UreqTransport,
};
use crate::retry::RetryDecision;

const CONTENT_TYPE_JSON: &str = "application/json";

/// Synchronous client for the search service.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Client using the default blocking HTTP transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(UreqTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Client configured from `TPUF_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `method path?query` with an optional JSON body, retrying
    /// transient failures, and return the body of the 200 response.
    pub fn execute(
        &self,
        ctx: &CallContext,
        method: HttpMethod,
        path: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        ctx.check()?;
        let request = self.build_request(method, path, query, body)?;
        let policy = &self.config.retry;

        let mut attempt: u32 = 0;
        loop {
            ctx.check()?;
            debug!(method = %request.method, url = %request.url, attempt, "sending request");

            let err = match self.attempt(ctx, &request) {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };

            let delay = match policy.decide(attempt, &err) {
                RetryDecision::Permanent => {
                    debug!(url = %request.url, attempt, error = %err, "request failed");
                    return Err(err);
                }
                RetryDecision::Exhausted => {
                    warn!(
                        url = %request.url,
                        attempts = attempt + 1,
                        error = %err,
                        "giving up after retries"
                    );
                    return Err(err);
                }
                RetryDecision::RetryAfter(delay) => delay,
            };

            if ctx.remaining().is_some_and(|left| left <= delay) {
                debug!(url = %request.url, ?delay, "deadline reached before next attempt");
                return Err(Error::DeadlineExceeded);
            }

            warn!(
                url = %request.url,
                status = ?err.http_status(),
                ?delay,
                attempt,
                error = %err,
                "retrying request"
            );
            self.config.timer.wait(delay, ctx)?;
            attempt += 1;
        }
    }

    pub(crate) fn get(
        &self,
        ctx: &CallContext,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>> {
        self.execute(ctx, HttpMethod::Get, path, query, None)
    }

    pub(crate) fn post(&self, ctx: &CallContext, path: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        self.execute(ctx, HttpMethod::Post, path, &[], Some(body))
    }

    /// One send/receive/classify cycle.
    fn attempt(&self, ctx: &CallContext, request: &HttpRequest) -> Result<Vec<u8>> {
        let timeout = shortest(ctx.remaining(), self.config.request_timeout);
        let result = self.send_cancellable(ctx, request, timeout)?;

        let HttpResponse {
            status,
            headers,
            body,
        } = result?;

        let content_encoding = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-encoding"))
            .map(|(_, value)| value.as_str());
        let body = match content_encoding {
            Some(encoding) if compression::is_gzip(encoding) => compression::gunzip(&body)
                .map_err(|source| Error::Decompression {
                    http_status: status,
                    source,
                })?,
            _ => body,
        };

        if status != HTTP_OK {
            return Err(error_from_response(status, &body));
        }
        Ok(body)
    }

    /// Run the transport on a helper thread and park on the context until
    /// it answers, the token is cancelled, or the deadline passes. An
    /// abandoned request keeps running until the transport gives up; its
    /// outcome is dropped.
    fn send_cancellable(
        &self,
        ctx: &CallContext,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<std::result::Result<HttpResponse, TransportError>> {
        let transport = Arc::clone(&self.transport);
        let outgoing = request.clone();
        let token = ctx.cancel_token().clone();
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("tpuf-request".to_string())
            .spawn(move || {
                // Dropped after `tx`, so a panicking `send` still wakes the
                // waiter and shows up as a disconnect.
                let _wake = WakeOnDrop(token);
                let tx = tx;
                let _ = tx.send(transport.send(&outgoing, timeout));
            })
            .map_err(|e| Error::Transport(TransportError::new(e)))?;

        let outcome = ctx.cancel_token().wait_for(ctx.deadline(), || match rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TransportError::new(
                "request thread exited without a response",
            ))),
        });
        if let Err(err) = &outcome {
            debug!(url = %request.url, error = %err, "abandoning in-flight request");
        }
        outcome
    }

    fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpRequest> {
        let url = build_url(&self.config.base_url, path, query)?;

        let mut headers = vec![
            (
                "authorization".to_string(),
                format!("Bearer {}", self.config.api_token),
            ),
            ("content-type".to_string(), CONTENT_TYPE_JSON.to_string()),
            ("accept".to_string(), CONTENT_TYPE_JSON.to_string()),
            ("user-agent".to_string(), self.config.user_agent.clone()),
        ];

        let body = if self.config.gzip {
            headers.push(("accept-encoding".to_string(), GZIP.to_string()));
            match body {
                Some(raw) => {
                    headers.push(("content-encoding".to_string(), GZIP.to_string()));
                    Some(compression::gzip(&raw).map_err(Error::Compression)?)
                }
                None => None,
            }
        } else {
            body
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

/// Join `path` onto `base_url` segment by segment and append `query`.
pub(crate) fn build_url(base_url: &str, path: &str, query: &[(&str, String)]) -> Result<String> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::Validation(format!("invalid base url {base_url:?}: {e}")))?;

    url.path_segments_mut()
        .map_err(|_| Error::Validation(format!("base url {base_url:?} cannot carry a path")))?
        .pop_if_empty()
        .extend(path.split('/').filter(|segment| !segment.is_empty()));

    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }

    Ok(url.into())
}

/// Wakes the waiting caller when the request thread finishes.
struct WakeOnDrop(CancelToken);

impl Drop for WakeOnDrop {
    fn drop(&mut self) {
        self.0.notify();
    }
}

fn shortest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
