//! Request pipeline.
//!
//! # Responsibilities
//! - Run every inbound request through the gateway's policy gates
//! - Proxy admitted requests to the route's backend
//! - Attach gateway, trace and rate-limit headers to every response
//! - Record request metrics and entry/exit logs
//!
//! # Gate Order
//! ```text
//! trace context + start time
//!     → route resolution (404, bypasses every other gate)
//!     → rate limit (429)
//!     → circuit breaker admission (503)
//!     → body buffering (413)
//!     → retry executor → attempt (breaker permit, deadline, backend call, outcome)
//!     → response headers, metrics, exit log
//! ```
//!
//! # Design Decisions
//! - Route lookup is pure and runs first because the limiter keys on route id
//! - Rate limiting precedes the breaker so throttled clients never take trial slots
//! - Every attempt reports to the breaker, not just the final one
//! - Admission gates never default to allow on internal error, except the
//!   limiter when `fail_open` is set

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::config::{GatewayConfig, RateLimitConfig, RetryConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::http::request::{buffer_body, UpstreamRequest, GATEWAY_HEADER_VALUE, X_GATEWAY_RESPONSE};
use crate::http::response::FallbackHandler;
use crate::observability::{metrics, TraceContext};
use crate::resilience::circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerRegistry};
use crate::resilience::retries::{is_retryable_method, RetryExecutor, RetryPolicy};
use crate::resilience::timeouts::with_timeout;
use crate::routing::{RouteDefinition, Router};
use crate::security::headers::{client_identifier, strip_hop_by_hop};
use crate::security::rate_limit::apply_rate_limit_headers;
use crate::security::{RateLimitDecision, RateLimitKey, RateLimiter};

pub type HttpClient = Client<HttpConnector, Body>;

/// Everything a request needs, built once at startup and shared by all tasks.
#[derive(Debug)]
pub struct Pipeline {
    router: Arc<Router>,
    rate_limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
    executor: RetryExecutor,
    retry_policy: RetryPolicy,
    fallback: FallbackHandler,
    client: HttpClient,
    rate_limiting: RateLimitConfig,
    retries: RetryConfig,
    response_timeout: Duration,
    max_body_size: usize,
    slow_request_threshold: Duration,
}

impl Pipeline {
    pub fn new(config: &GatewayConfig) -> Result<Self, url::ParseError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the pipeline with an explicit clock for time-based policies.
    pub fn with_clock(config: &GatewayConfig, clock: Arc<dyn Clock>) -> Result<Self, url::ParseError> {
        let router = Arc::new(Router::from_config(&config.routes)?);
        let breakers = CircuitBreakerRegistry::from_routes(&router, &config.circuit_breaker, clock.clone());

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.timeouts.connect_ms)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        tracing::info!(
            routes = router.routes().len(),
            circuit_breakers = breakers.len(),
            rate_limiting = config.rate_limiting.enabled,
            retries = config.retries.enabled,
            "Pipeline initialized"
        );

        Ok(Self {
            router,
            rate_limiter: RateLimiter::new(clock.clone()),
            breakers,
            executor: RetryExecutor::new(),
            retry_policy: RetryPolicy::from_config(&config.retries),
            fallback: FallbackHandler::new(clock, config.circuit_breaker.enabled),
            client,
            rate_limiting: config.rate_limiting.clone(),
            retries: config.retries.clone(),
            response_timeout: Duration::from_millis(config.timeouts.response_ms),
            max_body_size: config.security.max_body_size,
            slow_request_threshold: Duration::from_millis(config.observability.slow_request_threshold_ms),
        })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Process one inbound request end to end. Never fails: every error
    /// becomes a structured response.
    pub async fn handle(&self, request: Request<Body>, peer: Option<SocketAddr>) -> Response<Body> {
        let start = Instant::now();
        let trace = TraceContext::from_headers(request.headers());
        let span = tracing::info_span!(
            "gateway_request",
            trace_id = %trace.trace_id,
            span_id = %trace.span_id,
        );

        async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            let client = client_identifier(request.headers(), peer);

            tracing::info!(
                method = %method,
                path = %path,
                query = request.uri().query().unwrap_or(""),
                client = %client,
                parent_span_id = trace.parent_span_id.as_deref().unwrap_or(""),
                "Incoming request"
            );

            let (mut response, route_id, service) = match self.router.resolve(&path) {
                Some(route) => {
                    let response = self.route_request(route, request, peer, &client, &trace).await;
                    (response, route.id.as_str(), route.service())
                }
                None => {
                    tracing::warn!(path = %path, "No route matched");
                    let reason = GatewayError::RouteNotFound { path: path.clone() };
                    (self.reject(&reason, None, &path, &trace), "none", "unknown")
                }
            };

            response
                .headers_mut()
                .insert(X_GATEWAY_RESPONSE, HeaderValue::from_static(GATEWAY_HEADER_VALUE));
            trace.write_response_headers(response.headers_mut());

            let status = response.status().as_u16();
            metrics::record_request(route_id, method.as_str(), service, status, start);

            let elapsed = start.elapsed();
            tracing::info!(
                route = %route_id,
                method = %method,
                path = %path,
                status,
                duration_ms = elapsed.as_millis() as u64,
                "Outgoing response"
            );
            if elapsed > self.slow_request_threshold {
                tracing::warn!(
                    route = %route_id,
                    path = %path,
                    duration_ms = elapsed.as_millis() as u64,
                    threshold_ms = self.slow_request_threshold.as_millis() as u64,
                    "Slow request detected"
                );
            }

            response
        }
        .instrument(span)
        .await
    }

    /// Gates and proxying for a resolved route.
    async fn route_request(
        &self,
        route: &RouteDefinition,
        request: Request<Body>,
        peer: Option<SocketAddr>,
        client: &str,
        trace: &TraceContext,
    ) -> Response<Body> {
        let path = request.uri().path().to_string();

        let quota = match self.check_rate_limit(route, client) {
            Ok(quota) => quota,
            Err(reason) => {
                let mut response = self.reject(&reason, Some(route), &path, trace);
                if let GatewayError::RateLimited {
                    limit,
                    retry_after_secs,
                    reset_epoch_secs,
                } = reason
                {
                    let denied = RateLimitDecision::Denied {
                        retry_after_secs,
                        reset_epoch_secs,
                    };
                    apply_rate_limit_headers(response.headers_mut(), &denied, limit);
                }
                return response;
            }
        };

        let mut response = match self.proxy(route, request, peer, trace).await {
            Ok(response) => response,
            Err(reason) => {
                match &reason {
                    GatewayError::Internal(detail) => {
                        tracing::error!(route = %route.id, error = %detail, "Pipeline error")
                    }
                    other => tracing::warn!(route = %route.id, error = %other, "Request failed"),
                }
                self.reject(&reason, Some(route), &path, trace)
            }
        };

        if let Some((decision, limit)) = quota {
            apply_rate_limit_headers(response.headers_mut(), &decision, limit);
        }
        response
    }

    /// `Ok(None)` when no limit applies to this request.
    fn check_rate_limit(
        &self,
        route: &RouteDefinition,
        client: &str,
    ) -> GatewayResult<Option<(RateLimitDecision, u32)>> {
        if !self.rate_limiting.enabled {
            return Ok(None);
        }

        let capacity = route.metadata.rate_limit.unwrap_or(self.rate_limiting.default_limit);
        let period = route
            .metadata
            .refresh_period_secs
            .unwrap_or(self.rate_limiting.default_refresh_period_secs);
        let key = RateLimitKey::new(route.id.as_str(), client);

        match self.rate_limiter.try_consume(&key, capacity, period) {
            Ok(RateLimitDecision::Denied {
                retry_after_secs,
                reset_epoch_secs,
            }) => {
                tracing::warn!(key = %key, limit = capacity, retry_after_secs, "Rate limit exceeded");
                Err(GatewayError::RateLimited {
                    limit: capacity,
                    retry_after_secs,
                    reset_epoch_secs,
                })
            }
            Ok(decision) => Ok(Some((decision, capacity))),
            Err(e) if self.rate_limiting.fail_open => {
                tracing::warn!(key = %key, error = %e, "Rate limiter unavailable, admitting request");
                Ok(None)
            }
            Err(e) => Err(GatewayError::Internal(e.to_string())),
        }
    }

    /// Breaker admission, body buffering, and the retried backend call.
    async fn proxy(
        &self,
        route: &RouteDefinition,
        request: Request<Body>,
        peer: Option<SocketAddr>,
        trace: &TraceContext,
    ) -> GatewayResult<Response<Body>> {
        let breaker = self.breakers.get(&route.id);
        let mut first_permit = match &breaker {
            Some(breaker) => Some(admit(breaker, route)?),
            None => None,
        };

        let (parts, body) = request.into_parts();
        let body = buffer_body(&parts.headers, body, self.max_body_size).await?;
        let upstream = UpstreamRequest::prepare(route, &parts, body, peer, trace)?;

        let single = RetryPolicy::single_attempt();
        let policy = if route.retry && is_retryable_method(&parts.method, self.retries.idempotent_only) {
            &self.retry_policy
        } else {
            &single
        };

        tracing::debug!(
            route = %route.id,
            target = %upstream.uri,
            max_attempts = policy.max_attempts,
            "Forwarding request"
        );

        let service = route.service().to_string();
        let response = self
            .executor
            .execute(policy, &route.id, &service, |attempt| {
                let permit = match (attempt, &breaker) {
                    (1, _) => Ok(first_permit.take()),
                    (_, Some(breaker)) => admit(breaker, route).map(Some),
                    (_, None) => Ok(None),
                };
                let request = upstream.to_request();
                let client = self.client.clone();
                let timeout = self.response_timeout;
                let service = service.clone();

                async move {
                    let permit = permit?;
                    let request = request?;
                    call_backend(&client, request, permit, &service, timeout).await
                }
            })
            .await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body))
    }

    fn reject(
        &self,
        reason: &GatewayError,
        route: Option<&RouteDefinition>,
        path: &str,
        trace: &TraceContext,
    ) -> Response<Body> {
        self.fallback.build(reason, route, path, Some(trace)).into_response()
    }
}

/// Take a breaker permit, turning a rejection into `CircuitOpen`.
fn admit(breaker: &Arc<CircuitBreaker>, route: &RouteDefinition) -> GatewayResult<CallPermit> {
    match breaker.acquire() {
        Ok(Some(permit)) => Ok(permit),
        Ok(None) => {
            tracing::warn!(route = %route.id, service = %route.service(), "Circuit open, short-circuiting");
            Err(GatewayError::CircuitOpen {
                route_id: route.id.clone(),
                service: route.service().to_string(),
            })
        }
        Err(e) => Err(GatewayError::Internal(e.to_string())),
    }
}

/// One attempt: deadline, backend call, breaker outcome.
///
/// 5xx responses, connection errors and timeouts count as failures; 4xx is
/// the client's problem and counts as success.
async fn call_backend(
    client: &HttpClient,
    request: Request<Body>,
    permit: Option<CallPermit>,
    service: &str,
    timeout: Duration,
) -> GatewayResult<Response<Body>> {
    let started = Instant::now();
    let result = with_timeout(service, timeout, async {
        client
            .request(request)
            .await
            .map_err(|e| GatewayError::BackendFailure {
                service: service.to_string(),
                reason: e.to_string(),
            })
    })
    .await;

    let success = matches!(&result, Ok(response) if !response.status().is_server_error());
    if let Some(permit) = permit {
        permit
            .record(success, started.elapsed())
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
    }

    result.map(|response: hyper::Response<hyper::body::Incoming>| response.map(Body::new))
}
