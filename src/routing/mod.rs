//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (route lookup)
//!     → matcher.rs (segment-aware prefix test)
//!     → Return: matched RouteDefinition or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Parse backend URIs
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{RouteDefinition, Router};
