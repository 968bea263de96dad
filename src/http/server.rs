//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: health endpoint plus catch-all proxy handler
//! - Wire up middleware (HTTP tracing, CORS)
//! - Bind to a listener and serve until shutdown
//! - Hand every proxied request to the [`Pipeline`]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Method, Request},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::schema::CorsConfig;
use crate::config::GatewayConfig;
use crate::health::DownstreamHealth;
use crate::http::pipeline::Pipeline;
use crate::lifecycle::ShutdownSignal;
use crate::security::rate_limit::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub health: Arc<DownstreamHealth>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    pipeline: Arc<Pipeline>,
}

impl HttpServer {
    /// Create a server for `config`, using the system clock.
    pub fn new(config: &GatewayConfig) -> Result<Self, url::ParseError> {
        let pipeline = Arc::new(Pipeline::new(config)?);
        Ok(Self::with_pipeline(config, pipeline))
    }

    /// Create a server around an already built pipeline.
    pub fn with_pipeline(config: &GatewayConfig, pipeline: Arc<Pipeline>) -> Self {
        let health = Arc::new(DownstreamHealth::new(
            pipeline.router(),
            &config.health,
            pipeline.client().clone(),
        ));
        let state = AppState {
            pipeline: pipeline.clone(),
            health,
        };
        let router = Self::build_router(config, state);
        Self { router, pipeline }
    }

    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new();
        if config.health.enabled {
            router = router.route(&config.health.path, get(health_handler));
        }
        let router = router
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if config.cors.enabled {
            router.layer(cors_layer(&config.cors))
        } else {
            router
        }
    }

    /// Run the server, accepting connections until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.pipeline.router().routes().len(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.recv())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

/// Catch-all handler: every request goes through the pipeline.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    state.pipeline.handle(request, peer).await
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let report = state.health.check().await;
    (report.http_status(), Json(report)).into_response()
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(X_RATELIMIT_REMAINING),
            HeaderName::from_static(X_RATELIMIT_RESET),
            HeaderName::from_static(X_RATELIMIT_LIMIT),
            HeaderName::from_static(crate::http::request::X_GATEWAY_RESPONSE),
            HeaderName::from_static(crate::observability::tracing::X_TRACE_ID),
            HeaderName::from_static(crate::observability::tracing::X_SPAN_ID),
        ])
        .max_age(Duration::from_secs(config.max_age_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use tower::ServiceExt;

    fn server(config: &GatewayConfig) -> HttpServer {
        HttpServer::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_health_without_routes_is_up() {
        let app = server(&GatewayConfig::default()).router;
        let response = app
            .oneshot(Request::builder().uri("/actuator/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "UP");
    }

    #[tokio::test]
    async fn test_unrouted_path_goes_through_pipeline() {
        let app = server(&GatewayConfig::default()).router;
        let response = app
            .oneshot(Request::builder().uri("/api/v1/none").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-trace-id"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let app = server(&GatewayConfig::default()).router;
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/clientes")
            .header(header::ORIGIN, "http://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_MAX_AGE], "3600");
        let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        assert!(methods.contains("PATCH"));
    }
}
