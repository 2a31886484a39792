//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated)
//!     → logging section seeds runtime.rs (RuntimeConfig)
//!
//! On file change:
//!     watcher.rs reloads and validates
//!     → RuntimeConfig::apply(logging)
//!
//! On admin update:
//!     PUT /admin/config → RuntimeConfig::update(patch)
//! ```
//!
//! # Design Decisions
//! - Only request-logging settings are mutable at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod runtime;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use runtime::{LogSettings, RuntimeConfig, SettingsPatch};
pub use schema::{
    AdminConfig, AppConfig, FileSinkConfig, ListenerConfig, ObservabilityConfig, RequestConfig,
    SinkConfig, SinkKind, StoreConfig,
};
pub use validation::ValidationError;
