//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes, HttpBody};
use axum::http::{Method, Request};
use axum::response::Response;
use reqlog::sink::{LogEntry, Sink, SinkError, SinkStatsSnapshot};

/// Sink that keeps entries in memory.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn flush(&self) {}

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    fn stats(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            persisted: self.entries.lock().unwrap().len() as u64,
            ..SinkStatsSnapshot::default()
        }
    }
}

/// Poll until `sink` holds at least `count` entries, or two seconds pass.
pub async fn wait_for_entries(sink: &MemorySink, count: usize) -> Vec<LogEntry> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let entries = sink.entries();
        if entries.len() >= count || tokio::time::Instant::now() >= deadline {
            return entries;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn authed(method: Method, uri: &str, key: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {key}"));
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(resp: Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Request body that announces `len` bytes and then fails on the first read.
pub struct BrokenBody {
    pub len: u64,
}

impl HttpBody for BrokenBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Bytes>, Self::Error>>> {
        Poll::Ready(Some(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client went away",
        ))))
    }

    fn size_hint(&self) -> http_body::SizeHint {
        http_body::SizeHint::with_exact(self.len)
    }
}
