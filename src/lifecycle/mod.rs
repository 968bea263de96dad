//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Trigger → server stops accepting → in-flight requests drain → exit
//! ```
//!
//! # Design Decisions
//! - Startup is fail fast: config and route errors abort before binding
//! - Shutdown is graceful: axum drains open connections before returning

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
