//! Log sink subsystem.
//!
//! # Data Flow
//! ```text
//! request_log middleware
//!     → Sink::write(entry)
//!         sync:  persist inline under the sink's write lock
//!         async: try_send into the bounded buffer (full → drop + count)
//!     → buffer.rs drain task (sole writer for the sink)
//!     → Destination::persist (file.rs / store.rs)
//! ```
//!
//! # Design Decisions
//! - The request path never blocks on destination I/O in async mode
//! - Drops under backpressure are counted, never reported as errors
//! - One drain task per sink, so records persist in enqueue order
//! - `close()` drains everything already staged before releasing the destination

pub mod buffer;
pub mod entry;
pub mod file;
pub mod store;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use buffer::{Destination, SinkCore, SinkMode};
pub use entry::{CustomFields, LogEntry, DEFAULT_TIME_FORMAT};
pub use file::FileSink;
pub use store::{LogFilter, LogStats, StoreSink, StoredLog};

/// Errors produced by log sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to log store: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("log sink is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid table name {0:?}")]
    InvalidTable(String),
}

/// A destination that durably accepts log entries.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Accept one entry. In async mode this never waits on I/O.
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError>;

    /// Persist everything staged at the time of the call before returning.
    async fn flush(&self);

    /// Stop accepting entries, drain the buffer and release the destination.
    /// Calling it again is a no-op.
    async fn close(&self) -> Result<(), SinkError>;

    /// Short name used in diagnostics and metric labels.
    fn kind(&self) -> &'static str;

    /// True when `write` only stages the entry and never waits on I/O.
    fn is_buffered(&self) -> bool {
        false
    }

    fn stats(&self) -> SinkStatsSnapshot;
}

/// Per-sink delivery counters.
#[derive(Debug, Default)]
pub struct SinkStats {
    persisted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl SinkStats {
    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStatsSnapshot {
    pub persisted: u64,
    pub dropped: u64,
    pub failed: u64,
}
