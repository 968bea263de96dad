//! Fallback responses.
//!
//! # Responsibilities
//! - Turn every gateway error into a structured JSON body
//! - Name the unavailable service when a route has a circuit breaker attached
//! - Carry the active trace id so clients can quote it
//!
//! # Design Decisions
//! - Building a body is pure and never fails; a missing trace just omits `traceId`
//! - Bodies never contain internal error text, only stable messages
//! - Timeouts keep their 504 status even when a fallback message is used

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::GatewayError;
use crate::observability::TraceContext;
use crate::routing::RouteDefinition;

/// JSON body of every response the gateway synthesizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self.retry_after_seconds;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Builds [`ErrorBody`] values for rejected or failed requests.
#[derive(Debug, Clone)]
pub struct FallbackHandler {
    clock: Arc<dyn Clock>,
    circuit_breakers_enabled: bool,
}

impl FallbackHandler {
    pub fn new(clock: Arc<dyn Clock>, circuit_breakers_enabled: bool) -> Self {
        Self {
            clock,
            circuit_breakers_enabled,
        }
    }

    /// Describe `reason` for a request to `path`.
    ///
    /// `route` is the resolved route, if any; its service name is used for
    /// circuit-breaker fallbacks.
    pub fn build(
        &self,
        reason: &GatewayError,
        route: Option<&RouteDefinition>,
        path: &str,
        trace: Option<&TraceContext>,
    ) -> ErrorBody {
        let status = reason.status_code();
        let fallback_service = route
            .filter(|r| self.circuit_breakers_enabled && r.circuit_breaker)
            .map(|r| r.service());

        let mut retry_after_seconds = None;
        let (error, message) = match (reason.root(), fallback_service) {
            (GatewayError::RouteNotFound { path }, _) => (
                "Service Not Found".to_string(),
                format!("The requested service is not available: no route for {}", path),
            ),
            (GatewayError::RateLimited { retry_after_secs, .. }, _) => {
                retry_after_seconds = Some(*retry_after_secs);
                (
                    "Rate limit exceeded".to_string(),
                    format!(
                        "Too many requests. Please try again after {} seconds.",
                        retry_after_secs
                    ),
                )
            }
            (GatewayError::CircuitOpen { service, .. }, _) => (reason_phrase(status), unavailable(service)),
            (
                GatewayError::BackendFailure { .. }
                | GatewayError::BackendStatus { .. }
                | GatewayError::BackendTimeout { .. },
                Some(service),
            ) => (reason_phrase(status), unavailable(service)),
            (GatewayError::BackendFailure { .. }, None) => (
                reason_phrase(status),
                "Unable to connect to downstream service".to_string(),
            ),
            (GatewayError::BackendStatus { status: backend, .. }, None) => (
                reason_phrase(status),
                format!("Downstream service responded with status {}", backend),
            ),
            (GatewayError::BackendTimeout { .. }, None) => (
                reason_phrase(status),
                "Request to downstream service timed out".to_string(),
            ),
            (GatewayError::PayloadTooLarge { limit }, _) => (
                reason_phrase(status),
                format!("Request body exceeds the limit of {} bytes", limit),
            ),
            (GatewayError::InvalidRequestBody { .. }, _) => (
                reason_phrase(status),
                "Request body could not be read".to_string(),
            ),
            (GatewayError::Internal(_) | GatewayError::RetriesExhausted { .. }, _) => (
                reason_phrase(status),
                "An unexpected error occurred".to_string(),
            ),
        };

        ErrorBody {
            status: status.as_u16(),
            error,
            message,
            path: path.to_string(),
            trace_id: trace.map(|t| t.trace_id.clone()),
            timestamp: self.clock.now_millis(),
            retry_after_seconds,
        }
    }
}

fn reason_phrase(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Error").to_string()
}

fn unavailable(service: &str) -> String {
    format!("{} is currently unavailable. Please try again later.", service)
}
