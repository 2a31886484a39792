//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function of the parsed config; runs before the config is accepted

use std::net::SocketAddr;

use crate::config::runtime::LogSettings;
use crate::config::schema::{AppConfig, SinkKind};
use crate::sink::entry::is_valid_time_format;
use crate::sink::store::is_valid_identifier;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("time format {0:?} is not a valid strftime layout")]
    InvalidTimeFormat(String),

    #[error("listener.bind_address {0:?} is not a socket address")]
    InvalidBindAddress(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("sink.file.path must not be empty")]
    EmptyFilePath,

    #[error("sink.store.url must not be empty")]
    EmptyStoreUrl,

    #[error("sink.store.table {0:?} is not a valid identifier")]
    InvalidTable(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("admin API requires sink.kind = \"store\"")]
    AdminWithoutStore,
}

/// Checks that apply to the hot-reloadable logging section alone.
pub fn validate_settings(settings: &LogSettings) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !settings.time_format.is_empty() && !is_valid_time_format(&settings.time_format) {
        errors.push(ValidationError::InvalidTimeFormat(settings.time_format.clone()));
    }
    errors
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_settings(&config.logging);

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if let Some(path) = &config.sink.file.path {
        if path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyFilePath);
        }
    }

    let store = &config.sink.store;
    if store.url.trim().is_empty() {
        errors.push(ValidationError::EmptyStoreUrl);
    }
    if !is_valid_identifier(&store.table) {
        errors.push(ValidationError::InvalidTable(store.table.clone()));
    }
    if store.max_connections == 0 {
        errors.push(ValidationError::Zero("sink.store.max_connections"));
    }
    if store.statement_timeout_secs == 0 {
        errors.push(ValidationError::Zero("sink.store.statement_timeout_secs"));
    }
    if config.request.timeout_secs == 0 {
        errors.push(ValidationError::Zero("request.timeout_secs"));
    }

    if config.admin.enabled && config.sink.kind != SinkKind::Store {
        errors.push(ValidationError::AdminWithoutStore);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
