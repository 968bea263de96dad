//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, health endpoint, CORS, tracing layer)
//!     → pipeline.rs (gates: route, rate limit, breaker, retry)
//!     → request.rs (buffer body, rewrite URI, inject headers)
//!     → backend
//!     → response.rs (structured body for anything not proxied)
//!     → Send to client
//! ```

pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::Pipeline;
pub use response::{ErrorBody, FallbackHandler};
pub use server::HttpServer;
