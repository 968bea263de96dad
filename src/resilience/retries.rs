//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a request may be retried at all (method, route)
//! - Execute attempts with exponential backoff between them
//! - Surface the last failure once attempts run out
//!
//! # Design Decisions
//! - Only configured statuses and transient errors are retried
//! - 4xx client errors are never retried, even if misconfigured
//! - No delay before the first attempt
//! - The attempt closure owns breaker reporting, so every attempt counts

use std::future::Future;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Response, StatusCode};

use crate::config::RetryConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// How many times and how often to retry a downstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub multiplier: f64,
    pub retryable_statuses: Vec<StatusCode>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        if !config.enabled {
            return Self::single_attempt();
        }
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            multiplier: config.multiplier,
            retryable_statuses: config
                .retryable_statuses
                .iter()
                .filter_map(|code| StatusCode::from_u16(*code).ok())
                .collect(),
        }
    }

    /// Exactly one attempt; backend statuses pass through untouched.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            backoff_initial: Duration::ZERO,
            backoff_max: Duration::ZERO,
            multiplier: 1.0,
            retryable_statuses: Vec::new(),
        }
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        !status.is_client_error() && self.retryable_statuses.contains(&status)
    }

    /// Delay after `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.backoff_initial, self.backoff_max, self.multiplier)
    }
}

/// Whether `method` may be sent more than once.
pub fn is_retryable_method(method: &Method, idempotent_only: bool) -> bool {
    !idempotent_only || method.is_idempotent()
}

/// Runs a downstream call under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Call `attempt_fn` until it yields a final answer or attempts run out.
    ///
    /// The closure receives the 1-based attempt number. A response with a
    /// retryable status, or a transient error, triggers another attempt;
    /// anything else is returned as is.
    pub async fn execute<F, Fut>(
        &self,
        policy: &RetryPolicy,
        route_id: &str,
        service: &str,
        mut attempt_fn: F,
    ) -> GatewayResult<Response<Body>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GatewayResult<Response<Body>>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let failure = match attempt_fn(attempt).await {
                Ok(response) if policy.is_retryable_status(response.status()) => GatewayError::BackendStatus {
                    service: service.to_string(),
                    status: response.status().as_u16(),
                },
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if attempt >= policy.max_attempts {
                if policy.max_attempts > 1 {
                    tracing::warn!(
                        route = %route_id,
                        attempts = attempt,
                        error = %failure,
                        "Retries exhausted"
                    );
                    return Err(GatewayError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(failure),
                    });
                }
                return Err(failure);
            }

            let delay = policy.backoff(attempt);
            tracing::info!(
                route = %route_id,
                attempt,
                delay = ?delay,
                error = %failure,
                "Retrying request"
            );
            metrics::record_retry(route_id);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_initial: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            multiplier: 2.0,
            retryable_statuses: vec![StatusCode::SERVICE_UNAVAILABLE],
        }
    }

    fn respond(status: StatusCode) -> GatewayResult<Response<Body>> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        Ok(response)
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = RetryExecutor::new()
            .execute(&policy(3), "r", "svc", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { respond(StatusCode::SERVICE_UNAVAILABLE) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(GatewayError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, GatewayError::BackendStatus { status: 503, .. }));
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn test_recovers_mid_sequence() {
        let result = RetryExecutor::new()
            .execute(&policy(3), "r", "svc", |attempt| async move {
                if attempt < 3 {
                    Err(GatewayError::BackendFailure {
                        service: "svc".into(),
                        reason: "connection refused".into(),
                    })
                } else {
                    respond(StatusCode::OK)
                }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_client_errors_and_other_statuses_pass_through() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut p = policy(3);
        p.retryable_statuses.push(StatusCode::TOO_MANY_REQUESTS);
        let result = RetryExecutor::new()
            .execute(&p, "r", "svc", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { respond(StatusCode::TOO_MANY_REQUESTS) }
            })
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = RetryExecutor::new()
            .execute(&policy(3), "r", "svc", |_| async { respond(StatusCode::INTERNAL_SERVER_ERROR) })
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_non_transient_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = RetryExecutor::new()
            .execute(&policy(3), "r", "svc", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GatewayError::CircuitOpen {
                        route_id: "r".into(),
                        service: "svc".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_wrap() {
        let result = RetryExecutor::new()
            .execute(&policy(1), "r", "svc", |_| async {
                Err(GatewayError::BackendTimeout {
                    service: "svc".into(),
                    timeout: Duration::from_millis(10),
                })
            })
            .await;
        assert!(matches!(result, Err(GatewayError::BackendTimeout { .. })));
    }

    #[test]
    fn test_disabled_config_means_one_attempt() {
        let config = RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config), RetryPolicy::single_attempt());
        assert!(!RetryPolicy::single_attempt().is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_method_gate() {
        assert!(is_retryable_method(&Method::GET, true));
        assert!(is_retryable_method(&Method::PUT, true));
        assert!(!is_retryable_method(&Method::POST, true));
        assert!(is_retryable_method(&Method::POST, false));
    }
}
