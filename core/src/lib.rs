//! Synchronous client core for a remote vector/document search service.
//!
//! # Overview
//! Turns typed requests into HTTP exchanges that survive transient failures,
//! and encodes the service's filter language into its compact array form.
//!
//! # Design
//! - `Client::execute` is the one request path: it buffers the body once,
//!   optionally gzips it, sends attempts through a pluggable `Transport`,
//!   classifies every non-200 response, and retries transient failures with
//!   exponential backoff on an injectable `Timer`.
//! - Every call takes a `CallContext` (cancel token + optional deadline) and
//!   blocks the calling thread; there is no background runtime. Each attempt's
//!   send runs on a short-lived thread so a cancel can abandon it.
//! - `ClientConfig` is read-only and shared; there are no global defaults.
//! - `Error::kind()` tells transport, retriable, permanent, decode,
//!   validation and cancellation failures apart.
//! - `Filter` serializes straight to the wire format and embeds in any
//!   request struct.

pub mod client;
pub mod compression;
pub mod config;
pub mod context;
mod endpoints;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod http;
pub mod retry;
pub mod types;

pub use client::Client;
pub use config::ClientConfig;
pub use context::{CallContext, CancelToken};
pub use envelope::{decode_envelope, is_retriable_status};
pub use error::{ApiError, Error, ErrorKind, Result};
pub use filter::{Filter, Operator};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError, UreqTransport};
pub use retry::{RetryDecision, RetryPolicy, SystemTimer, Timer};
pub use types::{
    Attribute, AttributeType, DeleteByFilterRequest, DistanceMetric, ExportResponse,
    FullTextSearchParams, IncludeAttributes, Namespace, NamespacesRequest, NamespacesResponse,
    QueryRequest, QueryResult, RecallRequest, RecallResponse, Schema, Upsert, UpsertRequest,
    WarmCacheResult,
};
