//! Non-blocking HTTP request logging with pluggable sinks.
//!
//! An axum middleware records one [`LogEntry`] per request and hands it to a
//! [`Sink`]: an append-only JSON-lines file or a SQLite table. In async mode
//! entries are staged in a bounded buffer and persisted by a dedicated drain
//! task, so request latency never includes log I/O.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod sink;

pub use config::{AppConfig, LogSettings, RuntimeConfig, SettingsPatch};
pub use http::{AppServer, CapturedBody, LogContext};
pub use lifecycle::Shutdown;
pub use sink::{FileSink, LogEntry, Sink, SinkError, SinkMode, StoreSink};
