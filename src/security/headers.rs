//! Header manipulation and client identity.
//!
//! # Responsibilities
//! - Derive the client identifier used for rate limiting
//! - Append to X-Forwarded-For on the way to the backend
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Client identity precedence: X-Forwarded-For (first hop), X-Real-IP, socket address
//! - Hop-by-hop headers are connection-scoped and never forwarded

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Identify the calling client.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Remove connection-scoped headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Append the peer address to X-Forwarded-For.
pub fn append_forwarded_for(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    let Some(peer) = peer else {
        return;
    };
    let ip = peer.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Option<SocketAddr> {
        Some("192.168.1.9:40000".parse().unwrap())
    }

    #[test]
    fn test_client_identity_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, peer()), "192.168.1.9");
        assert_eq!(client_identifier(&headers, None), "unknown");

        headers.insert(X_REAL_IP, HeaderValue::from_static("10.0.0.7"));
        assert_eq!(client_identifier(&headers, peer()), "10.0.0.7");

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.5 , 10.0.0.1"));
        assert_eq!(client_identifier(&headers, peer()), "203.0.113.5");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-custom-hop"));
        headers.insert("x-custom-hop", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-custom-hop").is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(headers[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, peer());
        assert_eq!(headers[X_FORWARDED_FOR], "192.168.1.9");

        append_forwarded_for(&mut headers, Some("10.1.1.1:80".parse().unwrap()));
        assert_eq!(headers[X_FORWARDED_FOR], "192.168.1.9, 10.1.1.1");
    }
}
