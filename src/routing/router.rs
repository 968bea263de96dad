//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request path
//! - Rewrite the path for the backend (strip leading segments)
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Longest prefix wins; ties go to the route declared first
//! - Explicit NoMatch rather than silent default

use url::Url;

use crate::config::{RouteConfig, RouteMetadata};
use crate::routing::matcher::PathPrefixMatcher;

/// A compiled, immutable route.
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub id: String,
    pub matcher: PathPrefixMatcher,
    pub backend_uri: Url,
    pub strip_prefix_count: usize,
    pub metadata: RouteMetadata,
    /// Whether a circuit breaker guards this route.
    pub circuit_breaker: bool,
    /// Whether the retry policy applies to this route.
    pub retry: bool,
}

impl RouteDefinition {
    /// Compile a route from configuration.
    pub fn from_config(config: &RouteConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            id: config.id.clone(),
            matcher: PathPrefixMatcher::new(config.path_prefix.clone()),
            backend_uri: Url::parse(&config.uri)?,
            strip_prefix_count: config.strip_prefix,
            metadata: config.metadata.clone(),
            circuit_breaker: config.circuit_breaker,
            retry: config.retry,
        })
    }

    /// Service name for logs, metrics and fallback messages.
    pub fn service(&self) -> &str {
        self.metadata.service.as_deref().unwrap_or(&self.id)
    }

    pub fn path_prefix(&self) -> &str {
        self.matcher.prefix()
    }

    /// Backend URL for an inbound path and query.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Url {
        let forwarded = strip_segments(path, self.strip_prefix_count);
        let mut target = self.backend_uri.clone();
        let base = self.backend_uri.path().trim_end_matches('/');
        target.set_path(&format!("{}{}", base, forwarded));
        target.set_query(query);
        target
    }
}

/// Remove the first `count` non-empty segments from `path`.
///
/// The result always starts with `/`; a trailing slash survives if the
/// original path had one and anything is left.
pub fn strip_segments(path: &str, count: usize) -> String {
    if count == 0 {
        return if path.is_empty() { "/".to_string() } else { path.to_string() };
    }
    let remaining: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(count)
        .collect();
    let mut stripped = format!("/{}", remaining.join("/"));
    if path.ends_with('/') && !remaining.is_empty() {
        stripped.push('/');
    }
    stripped
}

/// Immutable route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<RouteDefinition>,
}

impl Router {
    /// Compile routes in declaration order.
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self, url::ParseError> {
        let routes = configs
            .iter()
            .map(RouteDefinition::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        for route in &routes {
            tracing::info!(
                route = %route.id,
                prefix = %route.path_prefix(),
                backend = %route.backend_uri,
                service = %route.service(),
                "Route registered"
            );
        }

        Ok(Self { routes })
    }

    /// Resolve the single most specific route for `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&RouteDefinition> {
        let mut best: Option<&RouteDefinition> = None;
        for route in &self.routes {
            if !route.matcher.matches(path) {
                continue;
            }
            match best {
                Some(current) if current.matcher.specificity() >= route.matcher.specificity() => {}
                _ => best = Some(route),
            }
        }
        best
    }

    pub fn routes(&self) -> &[RouteDefinition] {
        &self.routes
    }
}
