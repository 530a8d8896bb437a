//! Gateway request pipeline.
//!
//! Wraps every protected route:
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │ Request context  │ ← request id, client identity, endpoint
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request log    │ ← headers, form or raw body, params (500 if unreadable)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 missing / 401 invalid
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Rate limiter   │ ← may sleep; 429 on cooldown
//! └────────┬─────────┘
//!          ▼
//!       Handler        ← RequestContext in extensions
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     respond      │ ← envelope, cookie, x-request-id, response log
//! └──────────────────┘
//! ```
//!
//! Every outcome, including rejections, goes through [`respond`], so each
//! request logs exactly one request record and one response record.
//! Fallbacks run the same pipeline minus authentication and rate limiting
//! ([`PipelineLayer::without_admission`]).

use std::any::Any;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, Request, Response};
use axum::response::IntoResponse;
use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use serde_json::{Map, Value, json};
use tower::{Layer, Service};
use tracing::{Span, debug, error};

use crate::error::{AppError, AppResult};
use crate::logging::RequestSnapshot;
use crate::middleware::request_id::RequestContext;
use crate::response::{headers_to_map, respond};
use crate::state::AppState;

/// Layer installing the gateway pipeline in front of a service.
#[derive(Clone)]
pub struct PipelineLayer {
    state: AppState,
    admission: bool,
}

impl PipelineLayer {
    /// Full pipeline: auth and rate limiting before the handler.
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            admission: true,
        }
    }

    /// Request id, logging and envelope only. Used for fallbacks, which
    /// neither need a token nor count against a rate-limit bucket.
    pub fn without_admission(state: AppState) -> Self {
        Self {
            state,
            admission: false,
        }
    }
}

impl<S> Layer<S> for PipelineLayer {
    type Service = PipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PipelineService {
            inner,
            state: self.state.clone(),
            admission: self.admission,
        }
    }
}

#[derive(Clone)]
pub struct PipelineService<S> {
    inner: S,
    state: AppState,
    admission: bool,
}

impl<S> Service<Request<Body>> for PipelineService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        let admission = self.admission;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut ctx = RequestContext::from_request(&req, &state.config.automated_agent);
            let request_id = ctx.request_id.clone();
            let logger = state.logger.for_request(&request_id);

            Span::current().record("request_id", request_id.as_str());
            debug!(
                request_id = %request_id,
                client = %ctx.client_identity,
                endpoint = %ctx.endpoint,
                "Processing request"
            );

            let (mut req, snapshot) =
                match capture_request(req, &ctx, state.config.max_request_body_size).await {
                    Ok(captured) => captured,
                    Err(err) => return Ok(respond(err.into_response(), &ctx, &logger)),
                };
            logger.request_log(&snapshot);

            let admitted = if admission {
                admit(&state, &mut ctx, req.headers()).await
            } else {
                Ok(())
            };
            let response = match admitted {
                Ok(()) => {
                    req.extensions_mut().insert(ctx.clone());
                    inner.call(req).await?
                }
                Err(err) => err.into_response(),
            };

            Ok(respond(response, &ctx, &logger))
        })
    }
}

/// Authenticate, then run the rate limiter. Fills in `ctx.subject`.
pub async fn admit(
    state: &AppState,
    ctx: &mut RequestContext,
    headers: &HeaderMap,
) -> AppResult<()> {
    let subject = state.authenticator.authenticate(headers)?;
    ctx.subject = Some(subject);

    state
        .rate_limiter
        .check(&ctx.client_identity, &ctx.endpoint, ctx.is_automated)
        .await?;
    Ok(())
}

/// Buffer the body and describe the request for the request log.
///
/// Form fields (URL-encoded or multipart) are preferred. Any other body is
/// logged as JSON when it parses, else as UTF-8 text, else base64. The
/// returned request carries the same body, so handlers can still read it.
pub async fn capture_request(
    req: Request<Body>,
    ctx: &RequestContext,
    limit: usize,
) -> AppResult<(Request<Body>, RequestSnapshot)> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(AppError::from_error)?;

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let form = if content_type.starts_with("application/x-www-form-urlencoded") {
        decode_pairs(&bytes)
    } else if content_type.starts_with("multipart/form-data") {
        decode_multipart(content_type, bytes.clone()).await
    } else {
        Map::new()
    };
    let body = if form.is_empty() {
        raw_body(&bytes)
    } else {
        None
    };

    let url = match parts.headers.get(HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => format!("http://{host}{}", ctx.path),
        None => ctx.path.clone(),
    };

    let snapshot = RequestSnapshot {
        headers: headers_to_map(&parts.headers),
        form,
        body,
        params: decode_pairs(parts.uri.query().unwrap_or_default().as_bytes()),
        url,
        method: parts.method.to_string(),
    };

    Ok((Request::from_parts(parts, Body::from(bytes)), snapshot))
}

fn decode_pairs(input: &[u8]) -> Map<String, Value> {
    url::form_urlencoded::parse(input)
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

/// Text fields by name; file parts are logged by file name only.
///
/// A body that does not parse as multipart yields no fields, so it falls
/// back to the raw body.
async fn decode_multipart(content_type: &str, bytes: Bytes) -> Map<String, Value> {
    let mut fields = Map::new();
    let Ok(req) = Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
    else {
        return fields;
    };
    let Ok(mut multipart) = Multipart::from_request(req, &()).await else {
        return fields;
    };

    while let Ok(Some(field)) = multipart.next_field().await {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = match field.file_name().map(str::to_string) {
            Some(file_name) => json!({ "filename": file_name }),
            None => match field.text().await {
                Ok(text) => Value::String(text),
                Err(e) => {
                    debug!(error = %e, "Unreadable multipart field");
                    break;
                }
            },
        };
        fields.insert(name, value);
    }
    fields
}

fn raw_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_slice::<Value>(bytes) {
        return Some(json);
    }
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => BASE64_STANDARD.encode(bytes),
    };
    Some(Value::String(text))
}

/// Response for a handler panic caught by `CatchPanicLayer`.
///
/// The diagnostics ride along in the extensions, so [`respond`] logs them.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let err = AppError::from_panic(payload);
    error!(error = %err, "Handler panicked");
    err.into_response()
}
