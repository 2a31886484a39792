//! Configuration file watcher for hot reload.
//!
//! Only the `logging` section is live: it is pushed into the
//! [`RuntimeConfig`]. Everything else takes effect on restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::load_config;
use crate::config::runtime::RuntimeConfig;
use crate::config::schema::AppConfig;

/// Monitors the configuration file and emits every successfully reloaded config.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<AppConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<AppConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = %path.display(), "config file change detected, reloading");
                    match load_config(&path) {
                        Ok(config) => {
                            let _ = tx.send(config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to reload config, keeping current settings");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "config watcher started");
        Ok(watcher)
    }
}

/// Apply the `logging` section of every reloaded config until the sender closes.
pub fn spawn_reload_task(
    mut updates: mpsc::UnboundedReceiver<AppConfig>,
    runtime: Arc<RuntimeConfig>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            let previous = runtime.snapshot();
            match runtime.apply(config.logging) {
                Ok(next) => {
                    if next.async_mode != previous.async_mode || next.buffer_size != previous.buffer_size {
                        tracing::info!(
                            async_mode = next.async_mode,
                            buffer_size = next.buffer_size,
                            "sink mode changes take effect when the sink is recreated"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "rejected reloaded logging settings"),
            }
        }
    })
}
