//! In-memory stand-in for the vector search service.
//!
//! # Design
//! Implements the HTTP surface the client talks to, closely enough to drive
//! it end to end: bearer auth, gzip in both directions, the `{status, error}`
//! envelope, and a fault queue so tests can make the next requests fail with
//! a chosen status. Ranking is plain exhaustive distance; there is no ANN.

pub mod eval;

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};

use eval::DocView;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Clone, Debug, Default)]
pub struct NamespaceData {
    pub distance_metric: Option<String>,
    pub docs: BTreeMap<String, Document>,
}

/// A request as the handlers saw it, after gzip decoding.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub content_encoding: Option<String>,
    pub accept_encoding: Option<String>,
    pub body: Vec<u8>,
}

pub type Db = Arc<RwLock<BTreeMap<String, NamespaceData>>>;

/// Shared server state; clone it before starting the server to keep a
/// handle for fault injection and request inspection.
#[derive(Clone, Debug)]
pub struct MockState {
    db: Db,
    api_token: Option<String>,
    export_page_size: usize,
    faults: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            db: Db::default(),
            api_token: None,
            export_page_size: 1000,
            faults: Arc::default(),
            log: Arc::default(),
        }
    }
}

impl MockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept this bearer token; by default any non-empty token passes.
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_export_page_size(mut self, page_size: usize) -> Self {
        self.export_page_size = page_size.max(1);
        self
    }

    /// Answer the next `count` requests with `status` and an error envelope.
    pub fn fail_next(&self, count: usize, status: u16) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = envelope_error(&format!("injected fault {}", status.as_u16()));
        self.fail_next_with(count, status, body);
    }

    /// Answer the next `count` requests with `status` and a raw JSON body.
    pub fn fail_next_with(&self, count: usize, status: StatusCode, body: Value) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..count {
            faults.push_back((status, body.clone()));
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_fault(&self) -> Option<(StatusCode, Value)> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn record(&self, request: RecordedRequest) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }
}

pub fn app() -> Router {
    app_with_state(MockState::new())
}

pub fn app_with_state(state: MockState) -> Router {
    Router::new()
        .route("/v1/vectors", get(list_namespaces))
        .route("/v1/vectors/{namespace}", get(export).post(upsert))
        .route("/v1/vectors/{namespace}/query", post(query))
        .route("/v1/vectors/{namespace}/_debug/recall", post(recall))
        .route("/v1/namespaces/{namespace}", post(delete_by_filter))
        .route("/v1/namespaces/{namespace}/hint_cache_warm", get(warm_cache))
        .layer(middleware::from_fn_with_state(state.clone(), wire))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, MockState::new()).await
}

pub async fn run_with_state(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

// ---------------------------------------------------------------------------
// Envelope helpers
// ---------------------------------------------------------------------------

pub fn envelope_error(message: &str) -> Value {
    json!({"status": "error", "error": message})
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(envelope_error(message))).into_response()
}

fn ok_envelope() -> Json<Value> {
    Json(json!({"status": "OK"}))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("invalid request body: {e}")))
}

fn not_found(namespace: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        &format!("namespace '{namespace}' was not found"),
    )
}

// ---------------------------------------------------------------------------
// Wire middleware: faults, auth, gzip
// ---------------------------------------------------------------------------

async fn wire(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let accepts_gzip = header_str(&request, header::ACCEPT_ENCODING)
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("gzip")));

    let response = match decode_request(&state, request).await {
        Ok(request) => match state.next_fault() {
            Some((status, body)) => (status, Json(body)).into_response(),
            None => match authorize(&state, &request) {
                Ok(()) => next.run(request).await,
                Err(response) => response,
            },
        },
        Err(response) => response,
    };

    if accepts_gzip {
        compress_response(response).await
    } else {
        response
    }
}

fn header_str(request: &Request, name: header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn decode_request(state: &MockState, request: Request) -> Result<Request, Response> {
    let content_encoding = header_str(&request, header::CONTENT_ENCODING);
    let accept_encoding = header_str(&request, header::ACCEPT_ENCODING);
    let (mut parts, body) = request.into_parts();
    let raw = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("unreadable body: {e}")))?;

    let body = if content_encoding.as_deref() == Some("gzip") {
        let mut out = Vec::new();
        GzDecoder::new(&raw[..])
            .read_to_end(&mut out)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("bad gzip body: {e}")))?;
        parts.headers.remove(header::CONTENT_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);
        out
    } else {
        raw.to_vec()
    };

    state.record(RecordedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        content_encoding,
        accept_encoding,
        body: body.clone(),
    });

    Ok(axum::http::Request::from_parts(parts, Body::from(body)))
}

fn authorize(state: &MockState, request: &Request) -> Result<(), Response> {
    let token = header_str(request, header::AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string))
        .filter(|t| !t.is_empty());

    match (token, &state.api_token) {
        (None, _) => Err(error_response(StatusCode::UNAUTHORIZED, "missing bearer token")),
        (Some(got), Some(want)) if &got != want => {
            Err(error_response(StatusCode::FORBIDDEN, "invalid api token"))
        }
        _ => Ok(()),
    }
}

async fn compress_response(response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let Ok(raw) = to_bytes(body, usize::MAX).await else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let compressed = match encoder.write_all(&raw).and_then(|()| encoder.finish()) {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(compressed))
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListParams {
    prefix: Option<String>,
    page_size: Option<usize>,
    cursor: Option<String>,
}

async fn list_namespaces(State(state): State<MockState>, Query(params): Query<ListParams>) -> Json<Value> {
    let db = state.db.read().await;
    let page_size = params.page_size.filter(|n| *n > 0).unwrap_or(1000);
    let prefix = params.prefix.unwrap_or_default();

    let mut matching = db
        .keys()
        .filter(|id| id.starts_with(&prefix))
        .filter(|id| params.cursor.as_ref().map_or(true, |c| id.as_str() > c.as_str()));
    let page: Vec<&String> = matching.by_ref().take(page_size).collect();
    let has_more = matching.next().is_some();

    let mut body = json!({
        "namespaces": page.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
    });
    if has_more {
        if let Some(last) = page.last() {
            body["next_cursor"] = json!(last);
        }
    }
    Json(body)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct UpsertBody {
    distance_metric: Option<String>,
    #[serde(default)]
    upserts: Vec<UpsertDoc>,
    copy_from_namespace: Option<String>,
}

#[derive(Deserialize)]
struct UpsertDoc {
    id: String,
    vector: Option<Vec<f32>>,
    attributes: Option<Map<String, Value>>,
}

async fn upsert(
    State(state): State<MockState>,
    Path(namespace): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, Response> {
    let input: UpsertBody = parse_body(&body)?;
    let mut db = state.db.write().await;

    let copied = match &input.copy_from_namespace {
        Some(source) => Some(db.get(source).cloned().ok_or_else(|| not_found(source))?),
        None => None,
    };

    let ns = db.entry(namespace).or_default();
    if let Some(source) = copied {
        ns.docs.extend(source.docs);
        ns.distance_metric = ns.distance_metric.take().or(source.distance_metric);
    }
    if input.distance_metric.is_some() {
        ns.distance_metric = input.distance_metric;
    }
    for doc in input.upserts {
        match doc.vector.filter(|v| !v.is_empty()) {
            Some(vector) => {
                ns.docs.insert(
                    doc.id.clone(),
                    Document {
                        id: doc.id,
                        vector,
                        attributes: doc.attributes.unwrap_or_default(),
                    },
                );
            }
            None => {
                ns.docs.remove(&doc.id);
            }
        }
    }
    Ok(ok_envelope())
}

#[derive(Deserialize)]
struct DeleteByFilterBody {
    delete_by_filter: Value,
}

async fn delete_by_filter(
    State(state): State<MockState>,
    Path(namespace): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, Response> {
    let input: DeleteByFilterBody = parse_body(&body)?;
    if input.delete_by_filter.is_null() {
        return Err(error_response(StatusCode::BAD_REQUEST, "delete_by_filter is required"));
    }

    let mut db = state.db.write().await;
    let ns = db.get_mut(&namespace).ok_or_else(|| not_found(&namespace))?;

    let mut doomed = Vec::new();
    for doc in ns.docs.values() {
        let view = DocView {
            id: &doc.id,
            attributes: &doc.attributes,
        };
        if eval::matches(&input.delete_by_filter, &view)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e))?
        {
            doomed.push(doc.id.clone());
        }
    }
    for id in &doomed {
        ns.docs.remove(id);
    }
    Ok(Json(json!({"status": "OK", "rows_affected": doomed.len()})))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct QueryBody {
    vector: Option<Vec<f32>>,
    distance_metric: Option<String>,
    rank_by: Option<Value>,
    top_k: Option<usize>,
    #[serde(default)]
    include_vectors: bool,
    include_attributes: Option<Value>,
    filters: Option<Value>,
}

async fn query(
    State(state): State<MockState>,
    Path(namespace): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, Response> {
    let input: QueryBody = parse_body(&body)?;
    if input.rank_by.is_some() {
        return Err(error_response(StatusCode::BAD_REQUEST, "rank_by is not supported"));
    }
    let metric = match (&input.vector, input.distance_metric.as_deref()) {
        (Some(_), None) => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "distance_metric is required for vector search",
            ))
        }
        (_, Some(m)) if m != "cosine_distance" && m != "euclidean_squared" => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                &format!("unknown distance_metric '{m}'"),
            ))
        }
        (_, m) => m.map(str::to_string),
    };

    let db = state.db.read().await;
    let ns = db.get(&namespace).ok_or_else(|| not_found(&namespace))?;
    let filter = input.filters.unwrap_or(Value::Null);

    let mut hits: Vec<(f64, &Document)> = Vec::new();
    for doc in ns.docs.values() {
        let view = DocView {
            id: &doc.id,
            attributes: &doc.attributes,
        };
        if !eval::matches(&filter, &view).map_err(|e| error_response(StatusCode::BAD_REQUEST, &e))? {
            continue;
        }
        let dist = match (&input.vector, metric.as_deref()) {
            (Some(q), Some("cosine_distance")) => cosine_distance(q, &doc.vector),
            (Some(q), Some(_)) => euclidean_squared(q, &doc.vector),
            _ => 0.0,
        };
        hits.push((dist, doc));
    }
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    hits.truncate(input.top_k.unwrap_or(10));

    let results: Vec<Value> = hits
        .into_iter()
        .map(|(dist, doc)| {
            let mut result = json!({"id": doc.id, "dist": dist});
            if input.include_vectors {
                result["vector"] = json!(doc.vector);
            }
            if let Some(attrs) = select_attributes(&input.include_attributes, &doc.attributes) {
                result["attributes"] = Value::Object(attrs);
            }
            result
        })
        .collect();
    Ok(Json(Value::Array(results)))
}

fn select_attributes(selector: &Option<Value>, attributes: &Map<String, Value>) -> Option<Map<String, Value>> {
    match selector {
        Some(Value::Bool(true)) => Some(attributes.clone()),
        Some(Value::Array(names)) => Some(
            names
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|name| attributes.get(name).map(|v| (name.to_string(), v.clone())))
                .collect(),
        ),
        _ => None,
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let na: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

fn euclidean_squared(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
        .sum()
}

#[derive(Deserialize)]
struct ExportParams {
    cursor: Option<String>,
}

async fn export(
    State(state): State<MockState>,
    Path(namespace): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Json<Value>, Response> {
    let db = state.db.read().await;
    let ns = db.get(&namespace).ok_or_else(|| not_found(&namespace))?;

    let start = match params.cursor.as_deref() {
        Some(c) => c
            .parse::<usize>()
            .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid cursor"))?,
        None => 0,
    };
    let docs: Vec<&Document> = ns
        .docs
        .values()
        .skip(start)
        .take(state.export_page_size)
        .collect();
    let end = start + docs.len();

    let mut attributes: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for key in docs.iter().flat_map(|d| d.attributes.keys()) {
        attributes.entry(key.clone()).or_default();
    }
    for (key, column) in attributes.iter_mut() {
        column.extend(docs.iter().map(|d| d.attributes.get(key).cloned().unwrap_or(Value::Null)));
    }

    let next_cursor = (end < ns.docs.len()).then(|| end.to_string());
    Ok(Json(json!({
        "ids": docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
        "vectors": docs.iter().map(|d| d.vector.clone()).collect::<Vec<_>>(),
        "attributes": attributes,
        "next_cursor": next_cursor,
    })))
}

#[derive(Deserialize)]
struct RecallBody {
    top_k: Option<usize>,
}

async fn recall(
    State(state): State<MockState>,
    Path(namespace): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, Response> {
    let input: RecallBody = parse_body(&body)?;
    let db = state.db.read().await;
    let ns = db.get(&namespace).ok_or_else(|| not_found(&namespace))?;
    // Exhaustive search is the only search here, so recall is perfect.
    let count = input.top_k.unwrap_or(10).min(ns.docs.len()) as f64;
    Ok(Json(json!({
        "avg_recall": 1.0,
        "avg_exhaustive_count": count,
        "avg_ann_count": count,
    })))
}

async fn warm_cache(
    State(state): State<MockState>,
    Path(namespace): Path<String>,
) -> Result<Json<Value>, Response> {
    let db = state.db.read().await;
    if !db.contains_key(&namespace) {
        return Err(not_found(&namespace));
    }
    Ok(Json(json!({"status": "ACCEPTED", "message": "cache starting to warm"})))
}
