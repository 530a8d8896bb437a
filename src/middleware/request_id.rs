//! Per-request identity and context.
//!
//! Every request entering the gateway pipeline gets a [`RequestContext`]:
//! a request id (taken from `X-Request-Id` when the client sends one), the
//! resolved client identity, the endpoint, and the moment it arrived. The
//! context travels through the request extensions so handlers can reach it
//! with `Extension<RequestContext>`.
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:8000/backend/demo
//! ```
//!
//! The same id comes back in the `x-request-id` header and the `request_id`
//! cookie, and keys every log record of the request.

use std::time::Instant;

use axum::extract::OriginalUri;
use axum::http::{Method, Request, header};
use chrono::{DateTime, Utc};

use super::ip::client_identity;
use crate::utils::generate_request_id;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything the pipeline knows about the request being served.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Wall-clock arrival, used for logged durations.
    pub started_at: DateTime<Utc>,
    started: Instant,
    /// Authenticated subject, filled in once the bearer token checks out.
    pub subject: Option<String>,
    pub client_identity: String,
    /// Request path without query, the rate limiter's endpoint key.
    pub endpoint: String,
    /// Path and query as the client sent it.
    pub path: String,
    pub method: Method,
    pub user_agent: Option<String>,
    /// Whether the user agent matches the configured automated agent.
    pub is_automated: bool,
}

impl RequestContext {
    /// Build the context for an incoming request.
    ///
    /// Paths are read from [`OriginalUri`] when present so that routes nested
    /// under a prefix still log and rate-limit on the full path.
    pub fn from_request<B>(req: &Request<B>, automated_agent: &str) -> Self {
        let uri = req
            .extensions()
            .get::<OriginalUri>()
            .map_or_else(|| req.uri().clone(), |original| original.0.clone());

        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_automated = user_agent.as_deref() == Some(automated_agent);

        let path = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

        Self {
            request_id: extract_or_generate_request_id(req),
            started_at: Utc::now(),
            started: Instant::now(),
            subject: None,
            client_identity: client_identity(req).into_owned(),
            endpoint: uri.path().to_string(),
            path,
            method: req.method().clone(),
            user_agent,
            is_automated,
        }
    }

    /// Seconds since the request arrived.
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Longest client-supplied request id that is reused.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Extract request ID from headers or generate a new one.
///
/// A client id is reused only if it can travel verbatim in the tracking
/// cookie; anything else is replaced by a fresh UUID.
pub fn extract_or_generate_request_id<B>(req: &Request<B>) -> String {
    if let Some(header_value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = header_value.to_str()
        && is_valid_request_id(value)
    {
        return value.to_string();
    }

    generate_request_id()
}

/// Non-empty, bounded, and made only of RFC 6265 cookie-octets.
pub fn is_valid_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b';' | b',' | b'"' | b'\\'))
}
