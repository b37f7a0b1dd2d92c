//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives every endpoint
//! through a real `Client` over HTTP. Backoff waits go through a recording
//! timer that returns immediately, so retry tests run at full speed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mock_server::MockState;
use serde_json::json;
use tpuf_core::{
    CallContext, Client, ClientConfig, DeleteByFilterRequest, DistanceMetric, ErrorKind, Filter,
    IncludeAttributes, NamespacesRequest, QueryRequest, RecallRequest, Result, Timer, Upsert,
    UpsertRequest,
};

#[derive(Debug, Default)]
struct RecordingTimer {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingTimer {
    fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

impl Timer for RecordingTimer {
    fn wait(&self, duration: Duration, _ctx: &CallContext) -> Result<()> {
        self.waits.lock().unwrap().push(duration);
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start the mock server on a random port and return its base URL.
fn start_server(state: MockState) -> String {
    init_tracing();
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with_state(listener, state).await
        })
    });

    format!("http://{addr}")
}

fn client_for(base_url: &str, timer: Arc<RecordingTimer>) -> Client {
    Client::new(
        ClientConfig::new("test-token")
            .with_base_url(base_url)
            .with_request_timeout(Duration::from_secs(10))
            .with_timer(timer),
    )
}

fn seed_request() -> UpsertRequest {
    UpsertRequest {
        distance_metric: Some(DistanceMetric::EuclideanSquared),
        upserts: vec![
            Upsert::new("a", vec![0.0, 0.0]).with_attributes(json!({"kind": "x", "n": 1})),
            Upsert::new("b", vec![1.0, 0.0]).with_attributes(json!({"kind": "y", "n": 2})),
            Upsert::new("c", vec![3.0, 0.0]).with_attributes(json!({"kind": "x", "n": 3})),
        ],
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[test]
fn namespace_lifecycle() {
    let base = start_server(MockState::new());
    let client = client_for(&base, Arc::default());
    let ctx = CallContext::background();

    // Step 1: nothing there yet.
    let listed = client.namespaces(&ctx, &NamespacesRequest::default()).unwrap();
    assert!(listed.namespaces.is_empty());
    assert_eq!(listed.next_cursor, None);

    // Step 2: write three documents.
    client.upsert(&ctx, "docs", &seed_request()).unwrap();

    // Step 3: the namespace is listed.
    let listed = client.namespaces(&ctx, &NamespacesRequest::default()).unwrap();
    assert_eq!(listed.namespaces.len(), 1);
    assert_eq!(listed.namespaces[0].id, "docs");

    // Step 4: filtered vector search.
    let results = client
        .query(
            &ctx,
            "docs",
            &QueryRequest {
                vector: Some(vec![2.9, 0.0]),
                distance_metric: Some(DistanceMetric::EuclideanSquared),
                top_k: Some(10),
                include_attributes: Some(IncludeAttributes::Named(vec!["n".to_string()])),
                filters: Some(Filter::eq("kind", "x")),
                ..Default::default()
            },
        )
        .unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a"]);
    assert_eq!(results[0].attributes.as_ref().unwrap()["n"], json!(3));
    assert!(results[0].dist < results[1].dist);

    // Step 5: delete one by id.
    client.delete(&ctx, "docs", ["a"]).unwrap();

    // Step 6: delete another by filter.
    client
        .delete_by_filter(
            &ctx,
            "docs",
            &DeleteByFilterRequest {
                filter: Some(Filter::and([Filter::eq("kind", "x"), Filter::eq("n", 3)])),
            },
        )
        .unwrap();

    // Step 7: only "b" is left.
    let page = client.export(&ctx, "docs", None).unwrap();
    assert_eq!(page.ids, vec!["b"]);
    assert_eq!(page.vectors, vec![vec![1.0, 0.0]]);
    assert_eq!(page.attributes["kind"], vec![json!("y")]);
    assert_eq!(page.next_cursor, None);

    // Step 8: auxiliary endpoints.
    let warm = client.warm_cache(&ctx, "docs").unwrap();
    assert_eq!(warm.status, "ACCEPTED");

    let recall = client
        .recall(
            &ctx,
            "docs",
            &RecallRequest {
                num: Some(1),
                top_k: Some(5),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(recall.avg_recall, 1.0);
}

#[test]
fn namespace_listing_pages_with_cursor() {
    let base = start_server(MockState::new());
    let client = client_for(&base, Arc::default());
    let ctx = CallContext::background();

    for ns in ["team-a", "team-b", "team-c", "zzz"] {
        client.upsert(&ctx, ns, &seed_request()).unwrap();
    }

    let mut request = NamespacesRequest {
        prefix: Some("team-".to_string()),
        page_size: Some(2),
        cursor: None,
    };
    let mut seen = Vec::new();
    loop {
        let page = client.namespaces(&ctx, &request).unwrap();
        seen.extend(page.namespaces.into_iter().map(|n| n.id));
        match page.next_cursor {
            Some(cursor) => request.cursor = Some(cursor),
            None => break,
        }
    }
    assert_eq!(seen, vec!["team-a", "team-b", "team-c"]);
}

#[test]
fn export_follows_cursor() {
    let base = start_server(MockState::new().with_export_page_size(2));
    let client = client_for(&base, Arc::default());
    let ctx = CallContext::background();
    client.upsert(&ctx, "docs", &seed_request()).unwrap();

    let first = client.export(&ctx, "docs", None).unwrap();
    assert_eq!(first.ids, vec!["a", "b"]);
    let cursor = first.next_cursor.unwrap();

    let second = client.export(&ctx, "docs", Some(&cursor)).unwrap();
    assert_eq!(second.ids, vec!["c"]);
    assert_eq!(second.next_cursor, None);
}

#[test]
fn gzip_round_trip() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let client = Client::new(
        ClientConfig::new("test-token")
            .with_base_url(&base)
            .with_gzip(true),
    );
    let ctx = CallContext::background();

    client.upsert(&ctx, "docs", &seed_request()).unwrap();
    let results = client
        .query(
            &ctx,
            "docs",
            &QueryRequest {
                vector: Some(vec![0.0, 0.0]),
                distance_metric: Some(DistanceMetric::EuclideanSquared),
                top_k: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results[0].id, "a");

    let requests = state.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.content_encoding.as_deref(), Some("gzip"));
        assert_eq!(request.accept_encoding.as_deref(), Some("gzip"));
    }
    // The server recorded the decompressed JSON.
    let upsert: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(upsert["upserts"][0]["id"], "a");
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[test]
fn transient_failures_are_retried_with_backoff() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let timer = Arc::new(RecordingTimer::default());
    let client = client_for(&base, timer.clone());

    state.fail_next(2, 503);
    let listed = client
        .namespaces(&CallContext::background(), &NamespacesRequest::default())
        .unwrap();

    assert!(listed.namespaces.is_empty());
    assert_eq!(state.request_count(), 3);
    assert_eq!(
        timer.waits(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
}

#[test]
fn post_bodies_are_resent_identically() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let client = client_for(&base, Arc::default());

    state.fail_next(1, 429);
    client
        .upsert(&CallContext::background(), "docs", &seed_request())
        .unwrap();

    let requests = state.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
}

#[test]
fn exhausted_retries_return_last_error() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let client = Client::new(
        ClientConfig::new("test-token")
            .with_base_url(&base)
            .with_max_retries(2)
            .with_timer(Arc::new(RecordingTimer::default())),
    );

    state.fail_next(10, 500);
    let err = client
        .namespaces(&CallContext::background(), &NamespacesRequest::default())
        .unwrap_err();

    assert_eq!(state.request_count(), 3);
    assert_eq!(err.kind(), ErrorKind::RetriableApi);
    assert_eq!(err.http_status(), Some(500));
    assert_eq!(
        err.to_string(),
        "failed to list namespaces: error: injected fault 500 (HTTP 500)"
    );
}

#[test]
fn disabled_retries_make_one_attempt() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let client = Client::new(
        ClientConfig::new("test-token")
            .with_base_url(&base)
            .with_retry_disabled(),
    );

    state.fail_next(1, 503);
    let err = client
        .namespaces(&CallContext::background(), &NamespacesRequest::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RetriableApi);
    assert_eq!(state.request_count(), 1);
}

#[test]
fn client_errors_are_not_retried() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let timer = Arc::new(RecordingTimer::default());
    let client = client_for(&base, timer.clone());
    let ctx = CallContext::background();
    client.upsert(&ctx, "docs", &seed_request()).unwrap();

    let err = client
        .query(
            &ctx,
            "docs",
            &QueryRequest {
                rank_by: Some(json!(["text", "BM25", "hello"])),
                ..Default::default()
            },
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermanentApi);
    let api = err.api_error().unwrap();
    assert_eq!(api.status.as_deref(), Some("error"));
    assert_eq!(api.message, "rank_by is not supported");
    assert_eq!(api.http_status, 400);
    assert_eq!(
        err.to_string(),
        "failed to query documents: error: rank_by is not supported (HTTP 400)"
    );
    assert_eq!(state.request_count(), 2);
    assert!(timer.waits().is_empty());
}

#[test]
fn missing_namespace_is_permanent() {
    let base = start_server(MockState::new());
    let client = client_for(&base, Arc::default());

    let err = client
        .warm_cache(&CallContext::background(), "nope")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentApi);
    assert_eq!(err.http_status(), Some(404));
}

#[test]
fn wrong_token_is_rejected() {
    let state = MockState::new().with_api_token("right-token");
    let base = start_server(state.clone());
    let client = client_for(&base, Arc::default());

    let err = client
        .namespaces(&CallContext::background(), &NamespacesRequest::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentApi);
    assert_eq!(err.http_status(), Some(403));
    assert_eq!(state.request_count(), 1);
}

#[test]
fn invalid_documents_never_reach_the_server() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let client = client_for(&base, Arc::default());

    let request = UpsertRequest {
        upserts: vec![Upsert {
            id: "a".to_string(),
            vector: None,
            attributes: None,
        }],
        ..Default::default()
    };
    let err = client
        .upsert(&CallContext::background(), "docs", &request)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(state.request_count(), 0);
}

#[test]
fn delete_by_missing_filter_is_rejected_by_server() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let client = client_for(&base, Arc::default());
    let ctx = CallContext::background();
    client.upsert(&ctx, "docs", &seed_request()).unwrap();

    let err = client
        .delete_by_filter(&ctx, "docs", &DeleteByFilterRequest { filter: None })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentApi);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&state.requests()[1].body).unwrap(),
        json!({"delete_by_filter": null})
    );
}

#[test]
fn cancelled_context_sends_nothing() {
    let state = MockState::new();
    let base = start_server(state.clone());
    let client = client_for(&base, Arc::default());

    let ctx = CallContext::background();
    ctx.cancel_token().cancel();
    let err = client
        .namespaces(&ctx, &NamespacesRequest::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(state.request_count(), 0);
}

#[test]
fn cancel_interrupts_request_to_silent_server() {
    init_tracing();
    // Accepts connections and never answers.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });

    let client = Client::new(ClientConfig::new("test-token").with_base_url(format!("http://{addr}")));
    let ctx = CallContext::background();
    let canceller = ctx.cancel_token().clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .namespaces(&ctx, &NamespacesRequest::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    handle.join().unwrap();
}
