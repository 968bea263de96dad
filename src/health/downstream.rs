//! Downstream health aggregation.
//!
//! # Responsibilities
//! - Probe each distinct route service on demand
//! - Summarize the results as one UP/DOWN report
//!
//! # Design Decisions
//! - Probes run concurrently, each under its own timeout
//! - A 2xx answer is healthy unless its JSON body reports a status other than "UP"
//! - Routes can opt out with `metadata.health_check = false`

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use url::Url;

use crate::config::schema::HealthConfig;
use crate::http::pipeline::HttpClient;
use crate::routing::Router;

const PROBE_BODY_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Result of probing one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub status: HealthStatus,
    /// Round trip in milliseconds, e.g. "12ms".
    pub response_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub details: BTreeMap<String, ServiceHealth>,
}

impl HealthReport {
    pub fn http_status(&self) -> StatusCode {
        match self.status {
            HealthStatus::Up => StatusCode::OK,
            HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Probes the backends behind the route table.
#[derive(Debug, Clone)]
pub struct DownstreamHealth {
    client: HttpClient,
    targets: Vec<(String, Url)>,
    timeout: Duration,
}

impl DownstreamHealth {
    pub fn new(router: &Router, config: &HealthConfig, client: HttpClient) -> Self {
        let mut targets: Vec<(String, Url)> = Vec::new();
        for route in router.routes().iter().filter(|r| r.metadata.health_check) {
            if targets.iter().any(|(service, _)| service == route.service()) {
                continue;
            }
            let mut url = route.backend_uri.clone();
            let base = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{}{}", base, config.backend_path));
            url.set_query(None);
            targets.push((route.service().to_string(), url));
        }

        Self {
            client,
            targets,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn targets(&self) -> &[(String, Url)] {
        &self.targets
    }

    /// Probe every target and build the report.
    pub async fn check(&self) -> HealthReport {
        let mut probes = JoinSet::new();
        for (service, url) in &self.targets {
            let client = self.client.clone();
            let service = service.clone();
            let url = url.clone();
            let timeout = self.timeout;
            probes.spawn(async move {
                let health = probe(&client, &url, timeout).await;
                (service, health)
            });
        }

        let mut details = BTreeMap::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((service, health)) => {
                    details.insert(service, health);
                }
                Err(e) => tracing::error!(error = %e, "Health probe task failed"),
            }
        }

        let all_up = details.len() == self.targets.len()
            && details.values().all(|h| h.status == HealthStatus::Up);
        let (status, message) = if all_up {
            (HealthStatus::Up, "All downstream services are healthy")
        } else {
            (HealthStatus::Down, "Some downstream services are unavailable")
        };

        HealthReport {
            status,
            message: message.to_string(),
            details,
        }
    }
}

async fn probe(client: &HttpClient, url: &Url, timeout: Duration) -> ServiceHealth {
    let started = Instant::now();
    let outcome = match Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header(header::USER_AGENT, "api-gateway-health-check")
        .body(Body::empty())
    {
        Ok(request) => match tokio::time::timeout(timeout, fetch(client, request)).await {
            Ok(result) => result,
            Err(_) => Err("timeout".to_string()),
        },
        Err(e) => Err(e.to_string()),
    };
    let response_time = format!("{}ms", started.elapsed().as_millis());

    match outcome {
        Ok(()) => ServiceHealth {
            status: HealthStatus::Up,
            response_time,
            error: None,
        },
        Err(reason) => {
            tracing::warn!(target_url = %url, error = %reason, "Downstream health check failed");
            ServiceHealth {
                status: HealthStatus::Down,
                response_time,
                error: Some(reason),
            }
        }
    }
}

async fn fetch(client: &HttpClient, request: Request<Body>) -> Result<(), String> {
    let response = client.request(request).await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("status {}", status));
    }

    let body = axum::body::to_bytes(Body::new(response.into_body()), PROBE_BODY_LIMIT)
        .await
        .map_err(|e| e.to_string())?;
    let reported = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_string));
    match reported {
        Some(s) if s != "UP" => Err(format!("reported {}", s)),
        _ => Ok(()),
    }
}
