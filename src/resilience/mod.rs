//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (admit or short-circuit, per route)
//!     → timeouts.rs (connect/response deadline)
//!     → On failure: retries.rs (check if retryable, retry with backoff.rs)
//!     → circuit_breaker.rs (record every attempt's outcome)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for idempotent requests unless configured otherwise
//! - Each route owns its breaker; one failing service cannot trip another

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use retries::{RetryExecutor, RetryPolicy};
