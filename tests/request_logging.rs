//! Request interceptor behaviour, driven in-process with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use reqlog::config::{LogSettings, RuntimeConfig, SettingsPatch};
use reqlog::http::middleware::{request_log_middleware, RequestLogState};
use reqlog::sink::{CustomFields, FileSink, LogEntry, Sink, SinkMode};
use reqlog::{CapturedBody, LogContext};
use serde_json::Value;
use tower::ServiceExt; // .oneshot()

mod common;
use common::{get_req, wait_for_entries, BrokenBody, MemorySink};

fn settings(async_mode: bool) -> LogSettings {
    LogSettings {
        async_mode,
        ..LogSettings::default()
    }
}

fn app(runtime: Arc<RuntimeConfig>, sink: Arc<MemorySink>) -> Router {
    let state = RequestLogState::new(runtime, sink, 1024);
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/health", get(|| async { "ok" }))
        .route(
            "/api/users",
            get(|ctx: LogContext| async move {
                ctx.set("user_id", "12345");
                ctx.set("service", "users");
                "users"
            }),
        )
        .route(
            "/status/{code}",
            get(|Path(code): Path<u16>| async move {
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }),
        )
        .route("/ingest", post(|| async { StatusCode::ACCEPTED }))
        .route(
            "/echo",
            post(|Extension(CapturedBody(bytes)): Extension<CapturedBody>, body: String| async move {
                assert_eq!(bytes.as_ref(), body.as_bytes());
                body
            }),
        )
        .layer(from_fn_with_state(state, request_log_middleware))
}

fn runtime(settings: LogSettings) -> Arc<RuntimeConfig> {
    Arc::new(RuntimeConfig::new(settings).unwrap())
}

#[tokio::test]
async fn disabled_logging_produces_no_entries() {
    let sink = MemorySink::new();
    let runtime = runtime(LogSettings {
        enabled: false,
        ..settings(false)
    });
    let app = app(runtime, sink.clone());

    for uri in ["/api/users", "/status/500", "/api/health"] {
        let resp = app.clone().oneshot(get_req(uri)).await.unwrap();
        assert!(resp.extensions().get::<LogEntry>().is_none());
    }
    assert!(sink.entries().is_empty());
}

#[tokio::test]
async fn skip_paths_match_exactly() {
    let sink = MemorySink::new();
    let app = app(runtime(settings(false)), sink.clone());

    let resp = app.clone().oneshot(get_req("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(sink.entries().is_empty());

    app.oneshot(get_req("/api/health")).await.unwrap();
    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "/api/health");
}

#[tokio::test]
async fn entry_captures_request_facts() {
    let sink = MemorySink::new();
    let app = app(runtime(settings(false)), sink.clone());

    let req = Request::builder()
        .uri("/status/404?verbose=1")
        .header("user-agent", "integration-test/1.0")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.2")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.method, "GET");
    assert_eq!(entry.path, "/status/404");
    assert_eq!(entry.status_code, 404);
    assert_eq!(entry.client_ip, "203.0.113.7");
    assert_eq!(entry.user_agent, "integration-test/1.0");
    assert!(entry.duration_ms >= 0.0);
    assert!(entry.timestamp.ends_with('Z'));
    assert!(entry.custom_fields.is_empty());
}

#[tokio::test]
async fn handler_fields_override_template_fields() {
    let mut template = CustomFields::new();
    template.insert("service".into(), Value::from("gateway"));
    template.insert("region".into(), Value::from("eu-west-1"));

    let sink = MemorySink::new();
    let app = app(
        runtime(LogSettings {
            custom_fields: template,
            ..settings(false)
        }),
        sink.clone(),
    );

    let resp = app.oneshot(get_req("/api/users")).await.unwrap();
    let attached = resp.extensions().get::<LogEntry>().cloned().unwrap();

    let entry = sink.entries().remove(0);
    assert_eq!(entry, attached);
    assert_eq!(entry.custom_fields["user_id"], "12345");
    assert_eq!(entry.custom_fields["service"], "users");
    assert_eq!(entry.custom_fields["region"], "eu-west-1");

    let json = serde_json::to_string(&entry).unwrap();
    assert!(json.contains(r#""status_code":200"#));
    assert!(json.contains(r#""user_id":"12345""#));
}

#[tokio::test]
async fn async_dispatch_still_delivers() {
    let sink = MemorySink::new();
    let app = app(runtime(settings(true)), sink.clone());

    for i in 0..5 {
        let resp = app
            .clone()
            .oneshot(get_req(&format!("/status/{}", 200 + i)))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200 + i);
    }

    let entries = wait_for_entries(&sink, 5).await;
    assert_eq!(entries.len(), 5);
}

#[tokio::test]
async fn captured_body_is_visible_and_replayed() {
    let sink = MemorySink::new();
    let app = app(runtime(settings(false)), sink.clone());

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Body::from(r#"{"name":"widget"}"#))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = common::body_json(resp).await;
    assert_eq!(body["name"], "widget");
    assert_eq!(sink.entries()[0].method, "POST");
}

#[tokio::test]
async fn settings_changes_apply_to_the_next_request() {
    let sink = MemorySink::new();
    let runtime = runtime(settings(false));
    let app = app(Arc::clone(&runtime), sink.clone());

    app.clone().oneshot(get_req("/status/201")).await.unwrap();
    runtime
        .update(&SettingsPatch {
            enabled: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();
    app.clone().oneshot(get_req("/status/202")).await.unwrap();

    runtime
        .update(&SettingsPatch {
            enabled: Some(true),
            skip_paths: Some(vec!["/status/204".into()]),
            ..SettingsPatch::default()
        })
        .unwrap();
    app.clone().oneshot(get_req("/status/203")).await.unwrap();
    app.oneshot(get_req("/status/204")).await.unwrap();

    let statuses: Vec<u16> = sink.entries().iter().map(|e| e.status_code).collect();
    assert_eq!(statuses, vec![201, 203]);
}

#[tokio::test]
async fn body_read_failure_keeps_the_handler_response() {
    let sink = MemorySink::new();
    let app = app(runtime(settings(false)), sink.clone());

    let req = Request::builder()
        .method("POST")
        .uri("/ingest")
        .body(Body::new(BrokenBody { len: 5 }))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status_code, 202);
}

#[tokio::test]
async fn buffered_sink_is_staged_before_the_response_returns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.log");
    let sink = Arc::new(
        FileSink::open(&path, SinkMode::Async { capacity: 16 })
            .await
            .unwrap(),
    );
    assert!(sink.is_buffered());

    let state = RequestLogState::new(runtime(settings(true)), sink.clone(), 1024);
    let app = Router::new()
        .route("/orders", get(|| async { "ok" }))
        .layer(from_fn_with_state(state, request_log_middleware));

    for _ in 0..3 {
        let resp = app.clone().oneshot(get_req("/orders")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    // Close right away: nothing is left in flight outside the buffer.
    sink.close().await.unwrap();

    let lines = std::fs::read_to_string(&path).unwrap();
    assert_eq!(lines.lines().count(), 3);
    assert_eq!(sink.stats().persisted, 3);
}
