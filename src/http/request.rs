//! Request handling and transformation.
//!
//! # Responsibilities
//! - Buffer the inbound body within the configured size limit
//! - Rewrite the target URI for the resolved route
//! - Sanitize headers and inject gateway and trace headers
//! - Produce a fresh backend request for every attempt
//!
//! # Design Decisions
//! - The body is buffered once so retries can resend it
//! - `Host` is dropped; the client derives it from the target URI
//! - Original request preserved for logging; modified copy forwarded

use std::error::Error as StdError;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, Method, Request, Uri};
use http_body_util::LengthLimitError;

use crate::error::{GatewayError, GatewayResult};
use crate::observability::TraceContext;
use crate::routing::RouteDefinition;
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};

pub const X_GATEWAY_REQUEST: &str = "x-gateway-request";
pub const X_GATEWAY_RESPONSE: &str = "x-gateway-response";
pub const GATEWAY_HEADER_VALUE: &str = "API-Gateway";

/// Read the whole body, rejecting anything larger than `limit` bytes.
///
/// Only an exceeded limit is a 413; a body that fails mid-read (truncated,
/// reset, malformed chunking) is the client's error.
pub async fn buffer_body(headers: &HeaderMap, body: Body, limit: usize) -> GatewayResult<Bytes> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(GatewayError::PayloadTooLarge { limit });
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if exceeds_limit(&e) {
            GatewayError::PayloadTooLarge { limit }
        } else {
            GatewayError::InvalidRequestBody { reason: e.to_string() }
        }
    })
}

fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// A backend request that can be replayed for each attempt.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    /// Prepare the request that `route` forwards for `parts`.
    pub fn prepare(
        route: &RouteDefinition,
        parts: &Parts,
        body: Bytes,
        peer: Option<SocketAddr>,
        trace: &TraceContext,
    ) -> GatewayResult<Self> {
        let target = route.target_url(parts.uri.path(), parts.uri.query());
        let uri: Uri = target
            .as_str()
            .parse()
            .map_err(|e| GatewayError::Internal(format!("invalid target uri {}: {}", target, e)))?;

        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        append_forwarded_for(&mut headers, peer);
        headers.insert(X_GATEWAY_REQUEST, HeaderValue::from_static(GATEWAY_HEADER_VALUE));
        trace.inject(&mut headers);

        Ok(Self {
            method: parts.method.clone(),
            uri,
            headers,
            body,
        })
    }

    /// Build one attempt. Cloning `Bytes` is a reference-count bump.
    pub fn to_request(&self) -> GatewayResult<Request<Body>> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .body(Body::from(self.body.clone()))
            .map_err(|e| GatewayError::Internal(format!("failed to build backend request: {}", e)))?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::observability::tracing::{X_SPAN_ID, X_TRACE_ID};

    fn parts(uri: &str) -> Parts {
        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(header::HOST, "gateway.local")
            .header(header::CONNECTION, "keep-alive")
            .header(header::AUTHORIZATION, "Bearer abc")
            .body(())
            .unwrap();
        request.into_parts().0
    }

    #[test]
    fn test_prepare_rewrites_and_injects() {
        let mut config = RouteConfig::new("facturas", "/gw/facturas", "http://127.0.0.1:8082/base");
        config.strip_prefix = 1;
        let route = RouteDefinition::from_config(&config).unwrap();
        let trace = TraceContext::generate();

        let upstream = UpstreamRequest::prepare(
            &route,
            &parts("/gw/facturas/7?full=true"),
            Bytes::from_static(b"{}"),
            Some("10.0.0.5:5555".parse().unwrap()),
            &trace,
        )
        .unwrap();

        assert_eq!(upstream.uri.to_string(), "http://127.0.0.1:8082/base/facturas/7?full=true");
        assert_eq!(upstream.method, Method::PUT);
        assert!(upstream.headers.get(header::HOST).is_none());
        assert!(upstream.headers.get(header::CONNECTION).is_none());
        assert_eq!(upstream.headers[header::AUTHORIZATION], "Bearer abc");
        assert_eq!(upstream.headers[X_GATEWAY_REQUEST], GATEWAY_HEADER_VALUE);
        assert_eq!(upstream.headers["x-forwarded-for"], "10.0.0.5");
        assert_eq!(upstream.headers[X_TRACE_ID], trace.trace_id.as_str());
        assert_eq!(upstream.headers[X_SPAN_ID], trace.span_id.as_str());

        let first = upstream.to_request().unwrap();
        let second = upstream.to_request().unwrap();
        assert_eq!(first.uri(), second.uri());
        assert_eq!(first.headers(), second.headers());
    }

    #[tokio::test]
    async fn test_buffer_body_enforces_limit() {
        let mut headers = HeaderMap::new();
        let ok = buffer_body(&headers, Body::from("hello"), 16).await.unwrap();
        assert_eq!(&ok[..], b"hello");

        let err = buffer_body(&headers, Body::from(vec![0u8; 32]), 16).await.unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { limit: 16 }));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1000"));
        let err = buffer_body(&headers, Body::empty(), 16).await.unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { .. }));
    }

    /// A body whose client went away after a partial upload.
    struct Truncated {
        sent: bool,
    }

    impl hyper::body::Body for Truncated {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Result<hyper::body::Frame<Bytes>, Self::Error>>> {
            if self.sent {
                return std::task::Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before message completed",
                ))));
            }
            self.sent = true;
            std::task::Poll::Ready(Some(Ok(hyper::body::Frame::data(Bytes::from_static(b"0123456789")))))
        }
    }

    #[tokio::test]
    async fn test_broken_body_is_not_payload_too_large() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("100"));

        let err = buffer_body(&headers, Body::new(Truncated { sent: false }), 2 * 1024 * 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequestBody { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }
}
