//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! sink drain tasks, request_log middleware
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Drops and persistence failures are always visible as metrics, never as
//!   request errors
//! - Metric updates go through the `metrics` facade, so they are no-ops when
//!   no exporter is installed (tests, embedded use)

pub mod logging;
pub mod metrics;
