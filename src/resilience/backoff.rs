//! Exponential backoff.

use std::time::Duration;

/// Delay to wait after `attempt` (1-based) failed, before the next one.
///
/// `min(max, initial * multiplier^(attempt - 1))`; no jitter, so delays are
/// reproducible.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration, multiplier: f64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay_nanos = initial.as_nanos() as f64 * multiplier.powi(exponent);
    if !delay_nanos.is_finite() || delay_nanos >= max.as_nanos() as f64 {
        return max;
    }

    Duration::from_nanos(delay_nanos.round() as u64)
}
