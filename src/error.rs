//! Gateway error taxonomy.
//!
//! Every terminal outcome of the pipeline that is not a proxied backend
//! response is one of these variants. The fallback handler turns them into
//! structured JSON bodies; nothing here is ever serialized verbatim.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Errors produced while processing a request through the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No configured route matches the request path.
    #[error("no route matches path {path}")]
    RouteNotFound { path: String },

    /// The client exhausted its quota for the current window.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        limit: u32,
        retry_after_secs: u64,
        reset_epoch_secs: u64,
    },

    /// The route's circuit breaker rejected the call.
    #[error("circuit open for route {route_id}")]
    CircuitOpen { route_id: String, service: String },

    /// Connection refused, reset, or otherwise broken before a response.
    #[error("backend {service} unreachable: {reason}")]
    BackendFailure { service: String, reason: String },

    /// The backend answered with a status configured as retryable.
    #[error("backend {service} answered {status}")]
    BackendStatus { service: String, status: u16 },

    /// The per-call deadline expired.
    #[error("backend {service} timed out after {timeout:?}")]
    BackendTimeout { service: String, timeout: Duration },

    /// Every attempt allowed by the retry policy failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<GatewayError>,
    },

    /// The request body exceeds the buffering limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The client body ended early or could not be read.
    #[error("invalid request body: {reason}")]
    InvalidRequestBody { reason: String },

    /// Unexpected failure inside a gate.
    #[error("internal pipeline error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. }
            | GatewayError::BackendFailure { .. }
            | GatewayError::BackendStatus { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::RetriesExhausted { last, .. } => last.status_code(),
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InvalidRequestBody { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether another attempt may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::BackendFailure { .. }
                | GatewayError::BackendStatus { .. }
                | GatewayError::BackendTimeout { .. }
        )
    }

    /// The innermost error, looking through `RetriesExhausted`.
    pub fn root(&self) -> &GatewayError {
        match self {
            GatewayError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
