//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check route identity and prefix shape
//! - Validate value ranges (thresholds, window sizes, attempts)
//! - Reject retry policies that would retry client errors
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("duplicate route id '{0}'")]
    DuplicateRouteId(String),

    #[error("route '{route}': path_prefix '{prefix}' must start with '/'")]
    InvalidPrefix { route: String, prefix: String },

    #[error("route '{route}': uri '{uri}' is not an absolute http(s) URI")]
    InvalidUri { route: String, uri: String },

    #[error("route '{route}': rate_limit must be > 0")]
    ZeroRouteLimit { route: String },

    #[error("route '{route}': refresh_period_secs must be > 0")]
    ZeroRoutePeriod { route: String },

    #[error("{field} must be > 0")]
    MustBePositive { field: &'static str },

    #[error("{field} must be within (0, 100] (got {value})")]
    OutOfPercentRange { field: &'static str, value: f32 },

    #[error("minimum_number_of_calls ({minimum}) exceeds sliding_window_size ({window})")]
    MinimumCallsExceedWindow { minimum: usize, window: usize },

    #[error("retries.multiplier must be >= 1.0 (got {0})")]
    InvalidMultiplier(f64),

    #[error("retries.backoff_initial_ms ({initial}) exceeds backoff_max_ms ({max})")]
    BackoffBoundsInverted { initial: u64, max: u64 },

    #[error("retries.retryable_statuses may only contain 5xx codes (got {0})")]
    NonServerErrorRetryStatus(u16),
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for route in &config.routes {
        if !seen.insert(route.id.as_str()) {
            errors.push(ValidationError::DuplicateRouteId(route.id.clone()));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                route: route.id.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
        let uri_ok = Url::parse(&route.uri)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
            .unwrap_or(false);
        if !uri_ok {
            errors.push(ValidationError::InvalidUri {
                route: route.id.clone(),
                uri: route.uri.clone(),
            });
        }
        if route.metadata.rate_limit == Some(0) {
            errors.push(ValidationError::ZeroRouteLimit { route: route.id.clone() });
        }
        if route.metadata.refresh_period_secs == Some(0) {
            errors.push(ValidationError::ZeroRoutePeriod { route: route.id.clone() });
        }
    }

    let rl = &config.rate_limiting;
    if rl.default_limit == 0 {
        errors.push(ValidationError::MustBePositive { field: "rate_limiting.default_limit" });
    }
    if rl.default_refresh_period_secs == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "rate_limiting.default_refresh_period_secs",
        });
    }

    let cb = &config.circuit_breaker;
    if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 100.0) {
        errors.push(ValidationError::OutOfPercentRange {
            field: "circuit_breaker.failure_rate_threshold",
            value: cb.failure_rate_threshold,
        });
    }
    if cb.sliding_window_size == 0 {
        errors.push(ValidationError::MustBePositive { field: "circuit_breaker.sliding_window_size" });
    }
    if cb.minimum_number_of_calls == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "circuit_breaker.minimum_number_of_calls",
        });
    }
    if cb.minimum_number_of_calls > cb.sliding_window_size {
        errors.push(ValidationError::MinimumCallsExceedWindow {
            minimum: cb.minimum_number_of_calls,
            window: cb.sliding_window_size,
        });
    }
    if cb.permitted_number_of_calls_in_half_open_state == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "circuit_breaker.permitted_number_of_calls_in_half_open_state",
        });
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::MustBePositive { field: "retries.max_attempts" });
    }
    if !(retries.multiplier >= 1.0) {
        errors.push(ValidationError::InvalidMultiplier(retries.multiplier));
    }
    if retries.backoff_initial_ms > retries.backoff_max_ms {
        errors.push(ValidationError::BackoffBoundsInverted {
            initial: retries.backoff_initial_ms,
            max: retries.backoff_max_ms,
        });
    }
    for status in &retries.retryable_statuses {
        if !(500..600).contains(status) {
            errors.push(ValidationError::NonServerErrorRetryStatus(*status));
        }
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::MustBePositive { field: "timeouts.connect_ms" });
    }
    if config.timeouts.response_ms == 0 {
        errors.push(ValidationError::MustBePositive { field: "timeouts.response_ms" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
