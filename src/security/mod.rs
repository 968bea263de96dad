//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (derive client identity)
//!     → rate_limit.rs (check per route+client quota)
//!     → headers.rs (sanitize, add X-Forwarded-For) before proxying
//! ```
//!
//! # Design Decisions
//! - Fail closed: a limiter that cannot decide does not admit, unless configured to
//! - No trust in client input beyond identity headers

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{RateLimitDecision, RateLimitError, RateLimitKey, RateLimiter};
