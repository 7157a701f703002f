use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use cable_telemetry::{Event, TelemetryClient, TelemetryError, TelemetryOptions, Trace};
use httpmock::prelude::*;
use serde_json::json;

fn client_for(server: &MockServer) -> TelemetryClient {
    TelemetryClient::new(TelemetryOptions {
        host: server.base_url(),
        public_key: "pk-lf-1".to_string(),
        secret_key: "sk-lf-1".to_string(),
        http: None,
    })
    .unwrap()
}

#[tokio::test]
async fn flush_posts_one_batch_with_basic_auth() {
    let server = MockServer::start_async().await;
    let auth = format!("Basic {}", BASE64.encode("pk-lf-1:sk-lf-1"));
    let ingest = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/public/ingestion")
                .header("authorization", auth.as_str())
                .body_includes("\"type\":\"trace-create\"")
                .body_includes("\"type\":\"event-create\"")
                .body_includes("\"name\":\"stdout-line\"");
            then.status(200).json_body(json!({"successes": [], "errors": []}));
        })
        .await;

    let client = client_for(&server);
    let trace = client.trace(Trace::named("kernel-session"));
    client
        .event(Event {
            trace_id: trace.id.clone(),
            ..Event::named("stdout-line")
        })
        .unwrap();

    client.flush().await.unwrap();
    ingest.assert_async().await;
    assert_eq!(client.pending(), 0);

    // Nothing queued: no second request.
    client.flush().await.unwrap();
    assert_eq!(ingest.calls(), 1);
}

#[tokio::test]
async fn partial_rejection_drops_the_batch() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/public/ingestion");
            then.status(207).json_body(json!({
                "successes": [],
                "errors": [{"id": "e1", "status": 400, "message": "invalid body"}]
            }));
        })
        .await;

    let client = client_for(&server);
    client.trace(Trace::named("t"));

    let err = client.flush().await.unwrap_err();
    match err {
        TelemetryError::Batch(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].status, 400);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn multi_status_without_errors_is_success() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/public/ingestion");
            then.status(207).json_body(json!({"successes": [{"id": "t", "status": 201}], "errors": []}));
        })
        .await;

    let client = client_for(&server);
    client.trace(Trace::named("t"));
    client.flush().await.unwrap();
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn server_failure_requeues_events() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/public/ingestion");
            then.status(503).body("maintenance");
        })
        .await;

    let client = client_for(&server);
    let first = client.trace(Trace::named("first"));

    let err = client.flush().await.unwrap_err();
    assert!(matches!(err, TelemetryError::Status { status: 503, .. }));
    assert_eq!(client.pending(), 1);

    failing.delete_async().await;
    let second = client.trace(Trace::named("second"));
    let accepting = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/public/ingestion")
                .body_includes(first.id.as_str())
                .body_includes(second.id.as_str());
            then.status(201);
        })
        .await;

    client.flush().await.unwrap();
    accepting.assert_async().await;
    assert_eq!(client.pending(), 0);
}
