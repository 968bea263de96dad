//! API gateway library.
//!
//! Every inbound request passes the same ordered gates before it is proxied
//! to the backend that owns its path prefix: route resolution, per-client
//! rate limiting, per-route circuit breaking, and a retried downstream call
//! carrying trace headers. Rejections at any gate become structured JSON.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod routing;

pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::{HttpServer, Pipeline};
pub use lifecycle::Shutdown;
