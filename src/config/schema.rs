//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions mapping path prefixes to backend services.
    pub routes: Vec<RouteConfig>,

    /// Downstream call deadlines.
    pub timeouts: TimeoutConfig,

    /// Per-client rate limiting.
    pub rate_limiting: RateLimitConfig,

    /// Per-route circuit breaking.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy for downstream calls.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Downstream health aggregation endpoint.
    pub health: HealthConfig,

    pub security: SecurityConfig,

    pub cors: CorsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A route mapping a path prefix to one backend service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Unique route identifier, used as the rate-limit and breaker key.
    pub id: String,

    /// Path prefix to match (segment-aware, longest wins).
    pub path_prefix: String,

    /// Backend base URI (e.g., "http://localhost:8081").
    pub uri: String,

    /// Number of leading path segments removed before forwarding.
    #[serde(default)]
    pub strip_prefix: usize,

    /// Attach a circuit breaker to this route.
    #[serde(default = "default_true")]
    pub circuit_breaker: bool,

    /// Apply the retry policy to this route.
    #[serde(default = "default_true")]
    pub retry: bool,

    #[serde(default)]
    pub metadata: RouteMetadata,
}

impl RouteConfig {
    /// Route with default policy flags and empty metadata.
    pub fn new(id: impl Into<String>, path_prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path_prefix: path_prefix.into(),
            uri: uri.into(),
            strip_prefix: 0,
            circuit_breaker: true,
            retry: true,
            metadata: RouteMetadata::default(),
        }
    }
}

/// Free-form route metadata with the keys the pipeline reads.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteMetadata {
    /// Logical service name used in logs, metrics and fallback messages.
    #[serde(default)]
    pub service: Option<String>,

    /// Requests per window for this route (overrides the default limit).
    #[serde(default)]
    pub rate_limit: Option<u32>,

    /// Window length in seconds for this route.
    #[serde(default)]
    pub refresh_period_secs: Option<u64>,

    /// Include this route's service in the downstream health report.
    #[serde(default = "default_true")]
    pub health_check: bool,

    /// Any other keys, kept for logging and span tags.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for RouteMetadata {
    fn default() -> Self {
        Self {
            service: None,
            rate_limit: None,
            refresh_period_secs: None,
            health_check: true,
            extra: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Timeout configuration for downstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Time allowed for the backend to answer one attempt, in milliseconds.
    pub response_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 3_000,
            response_ms: 10_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per window when a route sets no override.
    pub default_limit: u32,

    /// Window length in seconds when a route sets no override.
    pub default_refresh_period_secs: u64,

    /// Admit requests when the limiter itself fails.
    pub fail_open: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: 100,
            default_refresh_period_secs: 60,
            fail_open: false,
        }
    }
}

/// Circuit breaker configuration shared by every route that attaches one.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,

    /// Failure percentage at or above which the breaker opens.
    pub failure_rate_threshold: f32,

    /// How long the breaker stays open before admitting a trial call.
    pub wait_duration_in_open_state_ms: u64,

    /// Number of outcomes kept in the sliding window.
    pub sliding_window_size: usize,

    /// Outcomes required before the failure rate is evaluated.
    pub minimum_number_of_calls: usize,

    /// Trial calls admitted while half-open.
    pub permitted_number_of_calls_in_half_open_state: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: 50.0,
            wait_duration_in_open_state_ms: 60_000,
            sliding_window_size: 10,
            minimum_number_of_calls: 5,
            permitted_number_of_calls_in_half_open_state: 3,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds.
    pub backoff_initial_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub backoff_max_ms: u64,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Backend statuses that trigger another attempt.
    pub retryable_statuses: Vec<u16>,

    /// Only retry idempotent methods (GET, HEAD, PUT, DELETE, OPTIONS, TRACE).
    pub idempotent_only: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff_initial_ms: 100,
            backoff_max_ms: 1_000,
            multiplier: 2.0,
            retryable_statuses: vec![503],
            idempotent_only: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Requests slower than this are logged at warn.
    pub slow_request_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            slow_request_threshold_ms: 1_000,
        }
    }
}

/// Downstream health endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,

    /// Gateway path serving the aggregated report.
    pub path: String,

    /// Path probed on every backend.
    pub backend_path: String,

    /// Per-backend probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/actuator/health".to_string(),
            backend_path: "/actuator/health".to_string(),
            timeout_secs: 3,
        }
    }
}

/// Request hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Cross-origin resource sharing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,

    /// Allowed origins; `*` allows any.
    pub allowed_origins: Vec<String>,

    pub allowed_methods: Vec<String>,

    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            max_age_secs: 3_600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_route_file() {
        let raw = r#"
            [[routes]]
            id = "clientes-service"
            path_prefix = "/api/v1/clientes"
            uri = "http://localhost:8081"

            [routes.metadata]
            service = "clientes-service"
            rate_limit = 50
            owner = "billing"
        "#;

        let config: GatewayConfig = toml::from_str(raw).unwrap();
        let route = &config.routes[0];
        assert_eq!(route.strip_prefix, 0);
        assert!(route.circuit_breaker);
        assert!(route.retry);
        assert_eq!(route.metadata.rate_limit, Some(50));
        assert!(route.metadata.health_check);
        assert_eq!(route.metadata.extra["owner"], serde_json::json!("billing"));

        assert_eq!(config.rate_limiting.default_limit, 100);
        assert_eq!(config.circuit_breaker.minimum_number_of_calls, 5);
        assert_eq!(config.retries.retryable_statuses, vec![503]);
    }
}
