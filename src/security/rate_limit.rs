//! Per-client rate limiting.
//!
//! One bucket per (route, client) pair, created on first use and kept for the
//! life of the process. Buckets are independent: each sits behind its own
//! mutex, and the key → bucket map is a sharded `DashMap`, so different
//! clients never wait on each other.
//!
//! The bucket is a fixed-window full refill, not a continuously refilled
//! token bucket: once `refill_period_secs` has passed since the last refill
//! the bucket jumps straight back to `capacity`. Exactly `capacity` requests
//! are admitted per window, with bursty admission at window boundaries.

use std::fmt;
use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, HeaderValue};
use dashmap::DashMap;
use thiserror::Error;

use crate::clock::Clock;
use crate::observability::metrics;

pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";

/// Identity a quota is tracked under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub route_id: String,
    pub client: String,
}

impl RateLimitKey {
    pub fn new(route_id: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            client: client.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.route_id, self.client)
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        tokens_remaining: u32,
        reset_epoch_secs: u64,
    },
    Denied {
        retry_after_secs: u64,
        reset_epoch_secs: u64,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// The limiter could not reach a decision.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit bucket for {0} is unavailable")]
    Unavailable(String),
}

#[derive(Debug)]
pub(crate) struct TokenBucket {
    capacity: u32,
    tokens: u32,
    refill_period_secs: u64,
    last_refill_epoch_secs: u64,
}

impl TokenBucket {
    fn new(capacity: u32, refill_period_secs: u64, now: u64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_period_secs,
            last_refill_epoch_secs: now,
        }
    }

    fn refill(&mut self, now: u64) {
        if now.saturating_sub(self.last_refill_epoch_secs) >= self.refill_period_secs {
            self.tokens = self.capacity;
            self.last_refill_epoch_secs = now;
        }
    }

    fn reset_epoch_secs(&self) -> u64 {
        self.last_refill_epoch_secs + self.refill_period_secs
    }

    fn try_consume(&mut self, now: u64) -> RateLimitDecision {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            RateLimitDecision::Allowed {
                tokens_remaining: self.tokens,
                reset_epoch_secs: self.reset_epoch_secs(),
            }
        } else {
            RateLimitDecision::Denied {
                retry_after_secs: self.reset_epoch_secs().saturating_sub(now),
                reset_epoch_secs: self.reset_epoch_secs(),
            }
        }
    }
}

/// Keyed fixed-window limiter.
// TODO: buckets are never evicted; a TTL sweep over `buckets` would bound memory for high-cardinality clients.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<RateLimitKey, Arc<Mutex<TokenBucket>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Take one token from the bucket for `key`, creating it if needed.
    pub fn try_consume(
        &self,
        key: &RateLimitKey,
        capacity: u32,
        refill_period_secs: u64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let bucket = self.bucket(key, capacity, refill_period_secs);
        let mut bucket = bucket
            .lock()
            .map_err(|_| RateLimitError::Unavailable(key.to_string()))?;

        let decision = bucket.try_consume(self.clock.now_secs());
        if !decision.is_allowed() {
            metrics::record_rate_limited(&key.route_id);
        }
        Ok(decision)
    }

    /// Number of distinct keys seen so far.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    // The Arc is cloned out so the map shard is released before the bucket lock is taken.
    pub(crate) fn bucket(&self, key: &RateLimitKey, capacity: u32, refill_period_secs: u64) -> Arc<Mutex<TokenBucket>> {
        if let Some(existing) = self.buckets.get(key) {
            return existing.value().clone();
        }
        let now = self.clock.now_secs();
        self.buckets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(capacity, refill_period_secs, now))))
            .value()
            .clone()
    }
}

/// Write the `X-RateLimit-*` headers for a decision.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, limit: u32) {
    let (remaining, reset) = match decision {
        RateLimitDecision::Allowed {
            tokens_remaining,
            reset_epoch_secs,
        } => (*tokens_remaining, *reset_epoch_secs),
        RateLimitDecision::Denied { reset_epoch_secs, .. } => (0, *reset_epoch_secs),
    };
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
}
