//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: application routes, admin routes, middleware
//! - Serve on a listener with graceful shutdown
//! - Flush and close the sink once the listener has stopped

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware,
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{RequestConfig, RuntimeConfig};
use crate::http::middleware::{request_log_middleware, CapturedBody, LogContext, RequestLogState};
use crate::lifecycle::{signals::shutdown_signal, Shutdown};
use crate::sink::Sink;

/// HTTP server wrapping every route in the request logger.
pub struct AppServer {
    router: Router,
    sink: Arc<dyn Sink>,
}

impl AppServer {
    /// `admin` is merged in before the logging layer, so admin calls are logged too.
    pub fn new(
        request: &RequestConfig,
        runtime: Arc<RuntimeConfig>,
        sink: Arc<dyn Sink>,
        admin: Option<Router>,
    ) -> Self {
        let log_state = RequestLogState::new(runtime, Arc::clone(&sink), request.max_capture_bytes);
        let router = Self::build_router(request, log_state, admin);
        Self { router, sink }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(
        request: &RequestConfig,
        log_state: RequestLogState,
        admin: Option<Router>,
    ) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/", any(echo_handler))
            .route("/{*path}", any(echo_handler));

        if let Some(admin) = admin {
            router = router.merge(admin);
        }

        router
            .layer(middleware::from_fn_with_state(log_state, request_log_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(request.timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until Ctrl+C/SIGTERM or `shutdown.trigger()`, then drain the sink.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, sink = self.sink.kind(), "HTTP server starting");

        let triggered = Shutdown::wait(shutdown.subscribe());
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => {},
                    _ = triggered => {},
                }
            })
            .await?;

        tracing::info!("HTTP server stopped, draining request log sink");
        self.sink.flush().await;
        if let Err(e) = self.sink.close().await {
            tracing::error!(sink = self.sink.kind(), error = %e, "failed to close request log sink");
        }

        let stats = self.sink.stats();
        tracing::info!(
            persisted = stats.persisted,
            dropped = stats.dropped,
            failed = stats.failed,
            "request log sink closed"
        );
        Ok(())
    }
}

async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Demo endpoint: echoes the request and tags the log entry with the caller's user id.
async fn echo_handler(ctx: LogContext, req: Request<Body>) -> Json<Value> {
    if let Some(user_id) = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
    {
        ctx.set("user_id", user_id);
    }

    let body = req
        .extensions()
        .get::<CapturedBody>()
        .map(|CapturedBody(bytes)| String::from_utf8_lossy(bytes).into_owned());

    Json(json!({
        "method": req.method().as_str(),
        "path": req.uri().path(),
        "body": body,
    }))
}
