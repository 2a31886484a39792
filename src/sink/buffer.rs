//! Bounded staging buffer and drain task shared by every sink.
//!
//! [`SinkCore`] implements the write/flush/close protocol once; concrete sinks
//! only provide a [`Destination`] that knows how to persist a single entry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::sink::{LogEntry, SinkError, SinkStats, SinkStatsSnapshot};

/// Where a sink's entries end up.
#[async_trait]
pub trait Destination: Send + Sync + 'static {
    /// Durably write one entry.
    async fn persist(&self, entry: &LogEntry) -> Result<(), SinkError>;

    /// Release the underlying handle. Called once, after the last persist.
    async fn release(&self) -> Result<(), SinkError>;
}

/// How a sink hands entries to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Persist inline on the calling task.
    Sync,
    /// Stage into a bounded buffer drained by a background task.
    Async { capacity: usize },
}

impl SinkMode {
    pub fn from_settings(async_mode: bool, buffer_size: usize) -> Self {
        if async_mode {
            SinkMode::Async {
                capacity: buffer_size.max(1),
            }
        } else {
            SinkMode::Sync
        }
    }
}

enum Staged {
    Entry(LogEntry),
    Flush(oneshot::Sender<()>),
}

struct State {
    closed: bool,
    tx: Option<mpsc::Sender<Staged>>,
    drain: Option<JoinHandle<()>>,
}

/// Write/flush/close machinery around a [`Destination`].
pub struct SinkCore<D> {
    kind: &'static str,
    mode: SinkMode,
    dest: Arc<D>,
    state: Mutex<State>,
    // Serialises inline writes against each other and against release.
    write_lock: tokio::sync::Mutex<()>,
    stats: Arc<SinkStats>,
}

impl<D: Destination> SinkCore<D> {
    /// Wrap `dest`. In async mode the drain task is spawned immediately, so
    /// this must run inside a Tokio runtime.
    pub fn new(kind: &'static str, dest: D, mode: SinkMode) -> Self {
        let dest = Arc::new(dest);
        let stats = Arc::new(SinkStats::default());

        let (tx, drain) = match mode {
            SinkMode::Sync => (None, None),
            SinkMode::Async { capacity } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                let handle = tokio::spawn(drain(kind, dest.clone(), stats.clone(), rx));
                (Some(tx), Some(handle))
            }
        };

        tracing::debug!(sink = kind, mode = ?mode, "log sink opened");

        Self {
            kind,
            mode,
            dest,
            state: Mutex::new(State {
                closed: false,
                tx,
                drain,
            }),
            write_lock: tokio::sync::Mutex::new(()),
            stats,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.mode, SinkMode::Async { .. })
    }

    pub fn destination(&self) -> &D {
        &self.dest
    }

    pub fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    pub async fn write(&self, entry: LogEntry) -> Result<(), SinkError> {
        if self.mode == SinkMode::Sync {
            return self.write_inline(entry).await;
        }

        let state = self.lock_state();
        if state.closed {
            return Err(SinkError::Closed);
        }
        let Some(tx) = state.tx.as_ref() else {
            return Err(SinkError::Closed);
        };

        match tx.try_send(Staged::Entry(entry)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(staged)) => {
                self.stats.record_dropped();
                metrics::record_entry_dropped(self.kind);
                if let Staged::Entry(entry) = staged {
                    tracing::warn!(
                        sink = self.kind,
                        method = %entry.method,
                        path = %entry.path,
                        "log buffer full, dropping entry"
                    );
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    async fn write_inline(&self, entry: LogEntry) -> Result<(), SinkError> {
        let _guard = self.write_lock.lock().await;
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        persist_one(self.kind, &*self.dest, &self.stats, &entry).await
    }

    pub async fn flush(&self) {
        let tx = {
            let state = self.lock_state();
            if state.closed {
                return;
            }
            match state.tx.as_ref() {
                Some(tx) => tx.clone(),
                None => return,
            }
        };

        // The marker queues behind everything staged so far; the drain task
        // acks once it reaches it.
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Staged::Flush(ack_tx)).await.is_err() {
            return;
        }
        drop(tx);
        let _ = ack_rx.await;
    }

    pub async fn close(&self) -> Result<(), SinkError> {
        let drain = {
            let mut state = self.lock_state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            // Dropping the sender lets the drain task finish once the buffer is empty.
            drop(state.tx.take());
            state.drain.take()
        };

        if let Some(handle) = drain {
            if let Err(e) = handle.await {
                tracing::error!(sink = self.kind, error = %e, "drain task terminated abnormally");
            }
        }

        let _guard = self.write_lock.lock().await;
        let stats = self.stats.snapshot();
        tracing::info!(
            sink = self.kind,
            persisted = stats.persisted,
            dropped = stats.dropped,
            failed = stats.failed,
            "log sink closed"
        );
        self.dest.release().await
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn persist_one<D: Destination>(
    kind: &'static str,
    dest: &D,
    stats: &SinkStats,
    entry: &LogEntry,
) -> Result<(), SinkError> {
    match dest.persist(entry).await {
        Ok(()) => {
            stats.record_persisted();
            metrics::record_entry_persisted(kind);
            Ok(())
        }
        Err(e) => {
            stats.record_failed();
            metrics::record_entry_failed(kind);
            Err(e)
        }
    }
}

/// Sole writer for an async sink. Runs until every sender is gone and the
/// buffer is empty.
async fn drain<D: Destination>(
    kind: &'static str,
    dest: Arc<D>,
    stats: Arc<SinkStats>,
    mut rx: mpsc::Receiver<Staged>,
) {
    while let Some(staged) = rx.recv().await {
        match staged {
            Staged::Entry(entry) => {
                if let Err(e) = persist_one(kind, &*dest, &stats, &entry).await {
                    tracing::error!(
                        sink = kind,
                        error = %e,
                        method = %entry.method,
                        path = %entry.path,
                        "failed to persist log entry"
                    );
                }
            }
            Staged::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!(sink = kind, "drain task finished");
}
