//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, TraceLayer, TimeoutLayer)
//!     → middleware/request_log.rs (time, build entry, dispatch to sink)
//!     → application or admin handler
//!     → response to client
//! ```

pub mod middleware;
pub mod server;

pub use middleware::{CapturedBody, LogContext};
pub use server::AppServer;
