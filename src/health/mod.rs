//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! GET <health.path>
//!     → downstream.rs (probe each route service's health endpoint)
//!     → aggregate report: UP (200) or DOWN (503)
//! ```
//!
//! # Design Decisions
//! - Probes are on demand; the gateway keeps no background health state
//! - Health never gates traffic; the circuit breakers do that

pub mod downstream;

pub use downstream::{DownstreamHealth, HealthReport, HealthStatus};
