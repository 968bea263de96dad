//! Trace context propagation.
//!
//! # Responsibilities
//! - Extract trace context from incoming requests
//! - Propagate trace context to backend requests
//! - Echo the identifiers on the response
//!
//! # Design Decisions
//! - `X-Trace-Id` wins over W3C `traceparent`; malformed values are ignored
//! - The gateway always opens its own span; an inbound span becomes the parent

use axum::http::{HeaderMap, HeaderValue};
use uuid::Uuid;

pub const X_TRACE_ID: &str = "x-trace-id";
pub const X_SPAN_ID: &str = "x-span-id";
pub const TRACEPARENT: &str = "traceparent";

const MAX_TRACE_ID_LEN: usize = 128;

/// Identifiers for one request as it passes through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    /// Start a brand new trace.
    pub fn generate() -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
        }
    }

    /// Continue the caller's trace if it sent one, otherwise start a new one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let traceparent = headers
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_traceparent);

        let explicit = headers
            .get(X_TRACE_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| is_valid_trace_id(v))
            .map(str::to_string);

        let (trace_id, parent) = match (explicit, traceparent) {
            (Some(id), tp) => {
                let parent = headers
                    .get(X_SPAN_ID)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| is_valid_trace_id(v))
                    .map(str::to_string)
                    .or_else(|| tp.filter(|(tp_trace, _)| *tp_trace == id).map(|(_, span)| span));
                (id, parent)
            }
            (None, Some((id, span))) => (id, Some(span)),
            (None, None) => return Self::generate(),
        };

        Self {
            trace_id,
            span_id: new_span_id(),
            parent_span_id: parent,
        }
    }

    /// Headers for the downstream request.
    pub fn inject(&self, headers: &mut HeaderMap) {
        self.write_ids(headers);
        if is_hex(&self.trace_id, 32) {
            let value = format!("00-{}-{}-01", self.trace_id, self.span_id);
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(TRACEPARENT, value);
            }
        }
    }

    /// Headers for the response to the client.
    pub fn write_response_headers(&self, headers: &mut HeaderMap) {
        self.write_ids(headers);
    }

    fn write_ids(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.trace_id) {
            headers.insert(X_TRACE_ID, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.span_id) {
            headers.insert(X_SPAN_ID, value);
        }
    }
}

fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_span_id() -> String {
    // All-zero span ids are invalid in W3C trace context.
    let id = rand::random::<u64>().max(1);
    format!("{:016x}", id)
}

fn is_valid_trace_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_TRACE_ID_LEN
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `version-traceid-parentid-flags`; returns (trace id, parent span id).
fn parse_traceparent(value: &str) -> Option<(String, String)> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;

    if !is_hex(version, 2) || version.eq_ignore_ascii_case("ff") || !is_hex(flags, 2) {
        return None;
    }
    if !is_hex(trace_id, 32) || trace_id.bytes().all(|b| b == b'0') {
        return None;
    }
    if !is_hex(span_id, 16) || span_id.bytes().all(|b| b == b'0') {
        return None;
    }
    Some((trace_id.to_ascii_lowercase(), span_id.to_ascii_lowercase()))
}
