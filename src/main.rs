//! reqlog server
//!
//! ```text
//!     Client Request
//!     ──────────────▶ TraceLayer ─▶ TimeoutLayer ─▶ request_log ─▶ handler
//!                                                        │
//!                                                        ▼
//!                                              Sink::write (owned entry)
//!                                                        │
//!                                      sync: persist inline │ async: bounded buffer
//!                                                        ▼
//!                                               drain task ─▶ file / SQLite
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use reqlog::admin::repository::SettingsRepository;
use reqlog::admin::{setup_admin_router, AdminState};
use reqlog::config::watcher::{spawn_reload_task, ConfigWatcher};
use reqlog::config::{load_config, AppConfig, RuntimeConfig, SinkKind};
use reqlog::observability::{logging, metrics};
use reqlog::sink::store::connect_pool;
use reqlog::{AppServer, FileSink, Shutdown, Sink, SinkMode, StoreSink};

#[derive(Parser)]
#[command(name = "reqlog-server")]
#[command(about = "Demo HTTP service with non-blocking request logging", long_about = None)]
struct Args {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_tracing(config.observability.json_logs);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "reqlog starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }

    let runtime = Arc::new(RuntimeConfig::new(config.logging.clone())?);

    let (sink, admin) = match config.sink.kind {
        SinkKind::File => {
            let settings = runtime.snapshot();
            let mode = SinkMode::from_settings(settings.async_mode, settings.buffer_size);
            let sink: Arc<dyn Sink> =
                Arc::new(FileSink::open(config.sink.file.resolved_path(), mode).await?);
            (sink, None)
        }
        SinkKind::Store => {
            let store_config = &config.sink.store;
            let settings_repo = if config.admin.enabled {
                let repo = SettingsRepository::new(
                    connect_pool(store_config).await?,
                    Duration::from_secs(store_config.statement_timeout_secs),
                );
                let persisted = repo.init_table().await?;
                runtime.apply(persisted.merge_into(&config.logging))?;
                Some(Arc::new(repo))
            } else {
                None
            };

            let settings = runtime.snapshot();
            let mode = SinkMode::from_settings(settings.async_mode, settings.buffer_size);
            let store = Arc::new(StoreSink::connect(store_config, mode).await?);
            store.ensure_schema().await?;

            let admin = settings_repo.map(|repo| {
                let state = AdminState::new(Arc::clone(&store), Arc::clone(&runtime), repo);
                setup_admin_router(state, &config.admin.api_key)
            });
            let sink: Arc<dyn Sink> = store;
            (sink, admin)
        }
    };

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            spawn_reload_task(updates, Arc::clone(&runtime));
            match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        sink = sink.kind(),
        admin = admin.is_some(),
        "listening for connections"
    );

    let server = AppServer::new(&config.request, runtime, sink, admin);
    let shutdown = Shutdown::new();
    server.run(listener, &shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
