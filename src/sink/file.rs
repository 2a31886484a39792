//! Append-only newline-delimited JSON file sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::sink::{Destination, LogEntry, Sink, SinkCore, SinkError, SinkMode, SinkStatsSnapshot};

/// File handle that writes and flushes one record at a time.
pub struct FileDestination {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileDestination {
    /// Open `path` in create-or-append mode, creating parent directories.
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        let open_err = |source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(open_err)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(open_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Destination for FileDestination {
    async fn persist(&self, entry: &LogEntry) -> Result<(), SinkError> {
        let line = entry.to_json_line()?;
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(SinkError::Closed)?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn release(&self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.lock().await.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

/// Sink that appends one JSON object per line to a file.
pub struct FileSink {
    core: SinkCore<FileDestination>,
}

impl FileSink {
    /// Open the log file. Failing to open it is fatal; no sink is returned.
    pub async fn open(path: impl AsRef<Path>, mode: SinkMode) -> Result<Self, SinkError> {
        let dest = FileDestination::open(path.as_ref()).await?;
        tracing::info!(path = %dest.path().display(), mode = ?mode, "file log sink opened");
        Ok(Self {
            core: SinkCore::new("file", dest, mode),
        })
    }

    pub fn path(&self) -> &Path {
        self.core.destination().path()
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError> {
        self.core.write(entry).await
    }

    async fn flush(&self) {
        self.core.flush().await
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.core.close().await
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_buffered(&self) -> bool {
        self.core.is_buffered()
    }

    fn stats(&self) -> SinkStatsSnapshot {
        self.core.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(path: &str, status: u16) -> LogEntry {
        LogEntry::new("POST", path, "10.1.1.1", "", status, Duration::from_millis(5), "ts")
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn sync_sink_writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = FileSink::open(&path, SinkMode::Sync).await.unwrap();

        let mut tagged = entry("/orders", 201);
        tagged.set_field("user_id", "12345");
        sink.write(tagged).await.unwrap();
        sink.write(entry("/orders/1", 404)).await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["custom_fields"]["user_id"], "12345");
        assert_eq!(lines[1]["status_code"], 404);
        assert!(lines[1].get("custom_fields").is_none());
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn async_sink_persists_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = FileSink::open(&path, SinkMode::Async { capacity: 16 }).await.unwrap();

        for i in 0..5 {
            sink.write(entry(&format!("/items/{i}"), 200)).await.unwrap();
        }
        sink.flush().await;

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4]["path"], "/items/4");
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn appends_to_existing_file_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logs").join("access.log");

        let first = FileSink::open(&path, SinkMode::Sync).await.unwrap();
        first.write(entry("/one", 200)).await.unwrap();
        first.close().await.unwrap();

        let second = FileSink::open(&path, SinkMode::Sync).await.unwrap();
        second.write(entry("/two", 200)).await.unwrap();
        second.close().await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["path"], "/one");
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        let result = FileSink::open(dir.path(), SinkMode::Sync).await;
        assert!(matches!(result, Err(SinkError::Open { .. })));
    }

    #[tokio::test]
    async fn closed_sink_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path().join("a.log"), SinkMode::Async { capacity: 4 })
            .await
            .unwrap();
        sink.close().await.unwrap();
        assert!(matches!(sink.write(entry("/x", 200)).await, Err(SinkError::Closed)));
    }
}
