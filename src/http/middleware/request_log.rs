//! Request logging middleware.
//!
//! # Responsibilities
//! - Decide per request whether to log, from one settings snapshot
//! - Time the downstream handler and build the [`LogEntry`]
//! - Let handlers attach custom fields through [`LogContext`]
//! - Hand the finished entry to the sink without delaying the response
//!
//! # Data Flow
//! ```text
//! request
//!     → snapshot RuntimeConfig
//!     → disabled or skipped path?  → next.run(req), no entry
//!     → capture small bodies (CapturedBody), insert LogContext
//!     → next.run(req)
//!     → LogEntry { template fields, then handler fields }
//!     → response extension copy + Sink::write
//! ```
//!
//! Buffered sinks are written inline since staging never waits on I/O. An
//! unbuffered sink is written from a spawned task when `async_mode` is set.
//! Nothing on the logging path changes the handler's response.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use futures_util::stream;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::observability::metrics;
use crate::sink::entry::format_timestamp;
use crate::sink::{CustomFields, LogEntry, Sink};

/// Shared state for [`request_log_middleware`].
#[derive(Clone)]
pub struct RequestLogState {
    pub runtime: Arc<RuntimeConfig>,
    pub sink: Arc<dyn Sink>,
    /// Bodies with a known length up to this size are buffered into [`CapturedBody`].
    pub max_capture_bytes: usize,
}

impl RequestLogState {
    pub fn new(runtime: Arc<RuntimeConfig>, sink: Arc<dyn Sink>, max_capture_bytes: usize) -> Self {
        Self {
            runtime,
            sink,
            max_capture_bytes,
        }
    }
}

/// Request body captured before the handler ran. The handler still receives
/// an identical body.
#[derive(Debug, Clone)]
pub struct CapturedBody(pub Bytes);

/// Request-scoped custom fields.
///
/// Inserted into the request extensions for every logged request. Also usable
/// as an extractor; on requests that are not logged it yields a detached
/// context whose fields go nowhere.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    fields: Arc<Mutex<CustomFields>>,
}

impl LogContext {
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Copy of the fields recorded so far.
    pub fn fields(&self) -> CustomFields {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, CustomFields> {
        self.fields.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> FromRequestParts<S> for LogContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<LogContext>().cloned().unwrap_or_default())
    }
}

pub async fn request_log_middleware(
    State(state): State<RequestLogState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let settings = state.runtime.snapshot();
    if !settings.enabled || settings.should_skip(req.uri().path()) {
        return next.run(req).await;
    }

    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let client_ip = client_ip(&req);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let ctx = LogContext::default();
    let mut req = capture_body(req, state.max_capture_bytes).await;
    req.extensions_mut().insert(ctx.clone());
    let mut response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    metrics::record_request(&method, status, start);

    let timestamp = format_timestamp(Utc::now(), &settings.time_format);
    let mut entry = LogEntry::new(method, path, client_ip, user_agent, status, elapsed, timestamp);
    entry.merge_fields(&settings.custom_fields);
    entry.merge_fields(&ctx.fields());

    response.extensions_mut().insert(entry.clone());
    dispatch(&state.sink, entry, settings.async_mode).await;
    response
}

async fn dispatch(sink: &Arc<dyn Sink>, entry: LogEntry, async_mode: bool) {
    if async_mode && !sink.is_buffered() {
        let sink = Arc::clone(sink);
        tokio::spawn(async move {
            if let Err(e) = sink.write(entry).await {
                tracing::debug!(sink = sink.kind(), error = %e, "request log entry not written");
            }
        });
    } else if let Err(e) = sink.write(entry).await {
        tracing::warn!(sink = sink.kind(), error = %e, "request log entry not written");
    }
}

/// Buffer the body when its exact length is known and small enough.
///
/// If reading fails the handler gets a body that yields the same error, and
/// no [`CapturedBody`] is attached.
async fn capture_body(req: Request<Body>, max_bytes: usize) -> Request<Body> {
    let len = match req.body().size_hint().exact() {
        Some(len) if len > 0 && len <= max_bytes as u64 => len,
        _ => return req,
    };

    let (mut parts, body) = req.into_parts();
    match axum::body::to_bytes(body, max_bytes).await {
        Ok(bytes) => {
            parts.extensions.insert(CapturedBody(bytes.clone()));
            Request::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            tracing::debug!(expected = len, error = %e, "request body not captured");
            let replay = stream::iter([Err::<Bytes, axum::Error>(e)]);
            Request::from_parts(parts, Body::from_stream(replay))
        }
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn client_ip<B>(req: &Request<B>) -> String {
    if let Some(ip) = forwarded_ip(req.headers()) {
        return ip;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header_value("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_value("x-real-ip"))
        .map(str::to_string)
}
