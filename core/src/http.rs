//! HTTP transport types and the pluggable send seam.
//!
//! # Design
//! Requests and responses are plain data. The client builds one
//! `HttpRequest` per logical call (URL, headers and the already-encoded body
//! bytes) and hands a reference to a `Transport` on every attempt, so the
//! body is buffered exactly once and resent byte-for-byte on retries.
//!
//! `Transport` is the only place that touches the network. `UreqTransport`
//! is the default; tests substitute scripted implementations.

use std::fmt;
use std::io::Read;
use std::time::Duration;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
///
/// `url` is absolute and already carries the encoded query string. `body`
/// holds the exact bytes put on the wire, gzip-compressed when the request
/// declares `content-encoding: gzip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Failure to obtain any HTTP response: DNS, connect, I/O or timeout.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TransportError {
    timed_out: bool,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            timed_out: false,
            source: source.into(),
        }
    }

    pub fn timeout(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            timed_out: true,
            source: source.into(),
        }
    }

    /// Whether the transport gave up because its time budget ran out.
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

/// Executes a single HTTP exchange.
///
/// Implementations must return every received response as data, whatever its
/// status code, and must not decompress bodies: the client decides what to do
/// with `content-encoding`. `timeout` bounds the whole exchange when set.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport backed by a shared `ureq::Agent`.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn send(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let result = match (request.method, request.body.as_deref()) {
            (HttpMethod::Get, _) => {
                let mut builder = self.agent.get(url);
                for (name, value) in &request.headers {
                    builder = builder.header(name, value);
                }
                builder.config().timeout_global(timeout).build().call()
            }
            (HttpMethod::Delete, _) => {
                let mut builder = self.agent.delete(url);
                for (name, value) in &request.headers {
                    builder = builder.header(name, value);
                }
                builder.config().timeout_global(timeout).build().call()
            }
            (HttpMethod::Post, body) => {
                let mut builder = self.agent.post(url);
                for (name, value) in &request.headers {
                    builder = builder.header(name, value);
                }
                let builder = builder.config().timeout_global(timeout).build();
                match body {
                    Some(bytes) => builder.send(bytes),
                    None => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(map_ureq_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut body = Vec::new();
        response
            .body_mut()
            .as_reader()
            .read_to_end(&mut body)
            .map_err(TransportError::new)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    if matches!(err, ureq::Error::Timeout(_)) {
        TransportError::timeout(err)
    } else {
        TransportError::new(err)
    }
}
