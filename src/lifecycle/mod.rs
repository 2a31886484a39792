//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal or trigger → stop accepting → finish in-flight requests
//!     → flush sink → close sink (drains the buffer) → exit
//!
//! Signals (signals.rs):
//!     Ctrl+C / SIGTERM → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The sink is closed only after the listener stops, so no request can
//!   race a closed sink during normal shutdown

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
