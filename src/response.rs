//! Standard JSON response envelope.
//!
//! Every response produced behind the pipeline has the same body:
//!
//! ```json
//! {"code": "HTTP_200_SUCCESS", "message": "Success", "data": {}, "error": false, "details": {}}
//! ```
//!
//! The `code` comes from a closed table; each code has exactly one HTTP status
//! and one default message. Callers may override the message, never the status.
//!
//! After a handler (or an error) has produced an envelope, [`respond`] finishes
//! the response: `Location` for redirects, the `request_id` tracking cookie and
//! the final log record.

use std::fmt;
use std::str::FromStr;

use axum::Json;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::Diagnostics;
use crate::logging::{GeneralLogKind, RequestLogger, ResponseSummary};
use crate::metrics;
use crate::middleware::request_id::{REQUEST_ID_HEADER, RequestContext};

/// Name of the tracking cookie set on every response.
pub const REQUEST_ID_COOKIE: &str = "request_id";

/// Symbolic response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    // 2XX Success
    Success,
    Created,
    RequestAccepted,
    NoContent,
    MultiStatus,
    // 3XX Redirection
    MovedPermanently,
    NotModified,
    UseProxy,
    // 4XX Client Error
    BadRequest,
    Unauthorized,
    AuthorizationMissing,
    InsufficientCredits,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    Conflict,
    TooManyRequests,
    // 5XX Server Error
    ServerError,
    AiError,
    AiBadGateway,
    AiServiceUnavailable,
}

/// Every code, in table order.
const ALL_CODES: [ResponseCode; 24] = [
    ResponseCode::Success,
    ResponseCode::Created,
    ResponseCode::RequestAccepted,
    ResponseCode::NoContent,
    ResponseCode::MultiStatus,
    ResponseCode::MovedPermanently,
    ResponseCode::NotModified,
    ResponseCode::UseProxy,
    ResponseCode::BadRequest,
    ResponseCode::Unauthorized,
    ResponseCode::AuthorizationMissing,
    ResponseCode::InsufficientCredits,
    ResponseCode::PaymentRequired,
    ResponseCode::Forbidden,
    ResponseCode::NotFound,
    ResponseCode::MethodNotAllowed,
    ResponseCode::NotAcceptable,
    ResponseCode::ProxyAuthenticationRequired,
    ResponseCode::Conflict,
    ResponseCode::TooManyRequests,
    ResponseCode::ServerError,
    ResponseCode::AiError,
    ResponseCode::AiBadGateway,
    ResponseCode::AiServiceUnavailable,
];

impl ResponseCode {
    /// Every code in table order.
    pub fn all() -> impl Iterator<Item = ResponseCode> {
        ALL_CODES.into_iter()
    }

    /// Wire name, status and default message.
    fn entry(self) -> (&'static str, StatusCode, &'static str) {
        match self {
            ResponseCode::Success => ("HTTP_200_SUCCESS", StatusCode::OK, "Success"),
            ResponseCode::Created => ("HTTP_201_CREATED", StatusCode::CREATED, "Resource Created"),
            ResponseCode::RequestAccepted => (
                "HTTP_202_REQUEST_ACCEPTED",
                StatusCode::ACCEPTED,
                "Request successfully accepted",
            ),
            ResponseCode::NoContent => (
                "HTTP_204_NO_CONTENT",
                StatusCode::NO_CONTENT,
                "No Content",
            ),
            ResponseCode::MultiStatus => (
                "HTTP_207_MULTI_STATUS",
                StatusCode::MULTI_STATUS,
                "Multi-Status",
            ),
            ResponseCode::MovedPermanently => (
                "HTTP_301_MOVED_PERMANENTLY",
                StatusCode::MOVED_PERMANENTLY,
                "Moved Permanently",
            ),
            ResponseCode::NotModified => (
                "HTTP_304_NOT_MODIFIED",
                StatusCode::NOT_MODIFIED,
                "Not Modified",
            ),
            ResponseCode::UseProxy => ("HTTP_305_USE_PROXY", StatusCode::USE_PROXY, "Use Proxy"),
            ResponseCode::BadRequest => (
                "HTTP_400_BAD_REQUEST",
                StatusCode::BAD_REQUEST,
                "Bad Request",
            ),
            ResponseCode::Unauthorized => (
                "HTTP_401_UNAUTHORIZED",
                StatusCode::UNAUTHORIZED,
                "Invalid Auth Credentials",
            ),
            ResponseCode::AuthorizationMissing => (
                "HTTP_401_AUTHORIZATION_MISSING",
                StatusCode::UNAUTHORIZED,
                "Authorization Credentials Missing",
            ),
            ResponseCode::InsufficientCredits => (
                "CREDIT_402_INSUFFICIENT_CREDITS",
                StatusCode::PAYMENT_REQUIRED,
                "Insufficient credits",
            ),
            ResponseCode::PaymentRequired => (
                "HTTP_402_PAYMENT_REQUIRED",
                StatusCode::PAYMENT_REQUIRED,
                "Payment Required",
            ),
            ResponseCode::Forbidden => ("HTTP_403_FORBIDDEN", StatusCode::FORBIDDEN, "Forbidden"),
            ResponseCode::NotFound => ("HTTP_404_NOT_FOUND", StatusCode::NOT_FOUND, "Not Found"),
            ResponseCode::MethodNotAllowed => (
                "HTTP_405_METHOD_NOT_ALLOWED",
                StatusCode::METHOD_NOT_ALLOWED,
                "Method Not Allowed",
            ),
            ResponseCode::NotAcceptable => (
                "HTTP_406_NOT_ACCEPTABLE",
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable",
            ),
            ResponseCode::ProxyAuthenticationRequired => (
                "HTTP_407_PROXY_AUTHENTICATION_REQUIRED",
                StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                "Proxy Authentication Required",
            ),
            ResponseCode::Conflict => ("HTTP_409_CONFLICT", StatusCode::CONFLICT, "Conflict"),
            ResponseCode::TooManyRequests => (
                "HTTP_429_TOO_MANY_REQUEST",
                StatusCode::TOO_MANY_REQUESTS,
                "Too many Requests. Try again later",
            ),
            ResponseCode::ServerError => (
                "HTTP_500_SERVER_ERROR",
                StatusCode::INTERNAL_SERVER_ERROR,
                "OOPS!! Server Error",
            ),
            ResponseCode::AiError => (
                "AI_ERROR",
                StatusCode::INTERNAL_SERVER_ERROR,
                "AI Process/Server Error",
            ),
            ResponseCode::AiBadGateway => (
                "AI_502_BAD_GATEWAY",
                StatusCode::BAD_GATEWAY,
                "Bad Gateway/AI server.",
            ),
            ResponseCode::AiServiceUnavailable => (
                "AI_503_CUDA_SERVICE_UNAVAILABLE",
                StatusCode::SERVICE_UNAVAILABLE,
                "CUDA Service Error",
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.entry().0
    }

    pub fn status(self) -> StatusCode {
        self.entry().1
    }

    pub fn default_message(self) -> &'static str {
        self.entry().2
    }

    /// Codes reporting a failure of the upstream AI service.
    pub fn is_ai(self) -> bool {
        matches!(
            self,
            ResponseCode::AiError | ResponseCode::AiBadGateway | ResponseCode::AiServiceUnavailable
        )
    }

    /// Code used when a response produced outside a handler (router 404/405,
    /// extractor rejections) carries an error status but no envelope.
    pub fn for_error_status(status: StatusCode) -> Option<ResponseCode> {
        if !(status.is_client_error() || status.is_server_error()) {
            return None;
        }
        let code = match status.as_u16() {
            401 => ResponseCode::Unauthorized,
            402 => ResponseCode::PaymentRequired,
            403 => ResponseCode::Forbidden,
            404 => ResponseCode::NotFound,
            405 => ResponseCode::MethodNotAllowed,
            406 => ResponseCode::NotAcceptable,
            407 => ResponseCode::ProxyAuthenticationRequired,
            409 => ResponseCode::Conflict,
            429 => ResponseCode::TooManyRequests,
            500..=599 => ResponseCode::ServerError,
            _ => ResponseCode::BadRequest,
        };
        Some(code)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A code name outside the table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown response code: {0}")]
pub struct UnknownResponseCode(pub String);

impl FromStr for ResponseCode {
    type Err = UnknownResponseCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_CODES
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownResponseCode(s.to_string()))
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// JSON body shared by every response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeBody {
    pub code: ResponseCode,
    pub message: String,
    pub data: Value,
    pub error: bool,
    pub details: Value,
}

/// A response built from a [`ResponseCode`].
///
/// Converting it into a response keeps a copy in the response extensions so
/// [`respond`] can log the body without re-reading it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    status: StatusCode,
    body: EnvelopeBody,
    location: Option<String>,
}

impl Envelope {
    /// Envelope with the default message and empty `data`/`details`.
    pub fn new(code: ResponseCode) -> Self {
        let status = code.status();
        Self {
            status,
            body: EnvelopeBody {
                code,
                message: code.default_message().to_string(),
                data: json!({}),
                error: status.as_u16() >= 400,
                details: json!({}),
            },
            location: None,
        }
    }

    /// Build an envelope in one call. An empty message keeps the default.
    pub fn build(
        code: ResponseCode,
        data: Option<Value>,
        details: Option<Value>,
        message: Option<&str>,
    ) -> Self {
        let mut envelope = Self::new(code);
        if let Some(data) = data {
            envelope = envelope.data(data);
        }
        if let Some(details) = details {
            envelope = envelope.details(details);
        }
        if let Some(message) = message {
            envelope = envelope.message(message);
        }
        envelope
    }

    pub fn data(mut self, data: Value) -> Self {
        self.body.data = data;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.body.details = details;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if !message.is_empty() {
            self.body.message = message;
        }
        self
    }

    /// Redirect target, used only with 3xx codes.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> ResponseCode {
        self.body.code
    }

    pub fn body(&self) -> &EnvelopeBody {
        &self.body
    }

    pub fn is_error(&self) -> bool {
        self.body.error
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(&self.body)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Finish a pipeline response.
///
/// Replaces envelope-less error responses with the matching envelope, logs
/// attached diagnostics, sets `Location` on redirects, sets the tracking
/// cookie and request id header, then writes the response log record.
pub fn respond(response: Response, ctx: &RequestContext, logger: &RequestLogger<'_>) -> Response {
    let response = ensure_envelope(response);
    let (mut parts, body) = response.into_parts();

    if let Some(diagnostics) = parts.extensions.remove::<Diagnostics>() {
        logger.exception_log(&diagnostics);
    }

    let envelope = parts.extensions.get::<Envelope>().cloned();

    if parts.status.is_redirection() {
        let location = envelope
            .as_ref()
            .and_then(|e| e.location.clone())
            .unwrap_or_else(|| ctx.path.clone());
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                parts.headers.insert(LOCATION, value);
            }
            Err(e) => warn!(request_id = %ctx.request_id, error = %e, "Invalid redirect location"),
        }
    }

    match HeaderValue::from_str(&tracking_cookie(&ctx.request_id)) {
        Ok(cookie) => {
            parts.headers.append(SET_COOKIE, cookie);
        }
        Err(e) => warn!(request_id = %ctx.request_id, error = %e, "Cannot set tracking cookie"),
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, value);
    }

    let summary = ResponseSummary {
        status: parts.status.as_u16(),
        headers: headers_to_map(&parts.headers),
        body: envelope
            .as_ref()
            .and_then(|e| serde_json::to_value(&e.body).ok())
            .unwrap_or(Value::Null),
    };

    if parts.status.as_u16() >= 400 {
        match envelope.as_ref() {
            Some(e) if parts.status.is_server_error() && e.code().is_ai() => {
                logger.general_log(GeneralLogKind::Ai, summary.body.clone(), None, true);
            }
            _ => logger.warn_log(&summary),
        }
    } else {
        logger.response_log(ctx.started_at, &summary);
    }

    metrics::record_request(
        &ctx.endpoint,
        ctx.method.as_str(),
        parts.status.as_u16(),
        ctx.elapsed_seconds(),
    );

    Response::from_parts(parts, body)
}

/// Cookie tying the response to the server-side logs.
pub fn tracking_cookie(request_id: &str) -> String {
    format!("{REQUEST_ID_COOKIE}={request_id}; Path=/; SameSite=lax")
}

fn ensure_envelope(response: Response) -> Response {
    if response.extensions().get::<Envelope>().is_some() {
        return response;
    }
    let Some(code) = ResponseCode::for_error_status(response.status()) else {
        return response;
    };

    let (parts, _) = response.into_parts();
    let mut rebuilt = Envelope::new(code).into_response();
    for (name, value) in parts.headers.iter() {
        if name != CONTENT_TYPE && name != CONTENT_LENGTH {
            rebuilt.headers_mut().append(name.clone(), value.clone());
        }
    }
    if let Some(diagnostics) = parts.extensions.get::<Diagnostics>() {
        rebuilt.extensions_mut().insert(diagnostics.clone());
    }
    rebuilt
}

pub(crate) fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.insert(name.as_str().to_string(), Value::String(value));
    }
    map
}
