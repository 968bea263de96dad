//! Route matching logic.
//!
//! # Responsibilities
//! - Match path prefix on segment boundaries
//! - Report match specificity so the router can prefer longer prefixes
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - `/api/v1/clientes` matches `/api/v1/clientes` and `/api/v1/clientes/7`,
//!   never `/api/v1/clientesX`
//! - No regex to guarantee O(n) matching

/// Matches the request path against a configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    /// Trailing slashes are dropped so `/api/` and `/api` behave the same.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns true if `path` falls under this prefix.
    pub fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Longer prefixes are more specific.
    pub fn specificity(&self) -> usize {
        self.prefix.len()
    }
}
