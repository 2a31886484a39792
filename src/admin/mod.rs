//! Admin API: log queries, statistics and live settings management.
//!
//! # Design Decisions
//! - Backed by the store sink; there is nothing to query with a file sink
//! - Settings updates are persisted first and applied second, one at a time,
//!   so the stored row and the live snapshot never diverge
//! - Applying is a compare-and-swap; an update that raced a config file
//!   reload is recomputed on top of the reloaded settings

pub mod auth;
pub mod handlers;
pub mod repository;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::sync::Mutex;

use crate::config::RuntimeConfig;
use crate::sink::StoreSink;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use self::repository::SettingsRepository;

pub use repository::{PersistedSettings, RepositoryError};

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<StoreSink>,
    pub runtime: Arc<RuntimeConfig>,
    pub settings: Arc<SettingsRepository>,
    update_lock: Arc<Mutex<()>>,
}

impl AdminState {
    pub fn new(
        store: Arc<StoreSink>,
        runtime: Arc<RuntimeConfig>,
        settings: Arc<SettingsRepository>,
    ) -> Self {
        Self {
            store,
            runtime,
            settings,
            update_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Admin routes. `/admin/health` is always open; the rest require `api_key`
/// when it is non-empty.
pub fn setup_admin_router(state: AdminState, api_key: &str) -> Router {
    Router::new()
        .route("/admin/logs", get(list_logs).delete(delete_logs))
        .route("/admin/logs/{id}", get(get_log))
        .route("/admin/stats", get(get_stats))
        .route("/admin/config", get(get_config).put(update_config))
        .route("/admin/config/reset", post(reset_config))
        .route_layer(middleware::from_fn_with_state(
            Arc::<str>::from(api_key),
            admin_auth_middleware,
        ))
        .route("/admin/health", get(health))
        .with_state(state)
}
