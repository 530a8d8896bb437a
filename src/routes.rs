//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//!    /, /health-check  (no pipeline)
//!          │
//!    /backend/*
//!          ▼
//! ┌──────────────────┐
//! │ Gateway pipeline │ ← request log, auth, rate limit, envelope, response log
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Catch panic    │ ← 500 envelope, diagnostics logged by the pipeline
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! The full pipeline wraps matched `/backend` routes. Unknown paths get an
//! `HTTP_404_NOT_FOUND` envelope through the pipeline without auth or rate
//! limiting, so they are still logged and carry the tracking cookie.

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::handler::HandlerWithoutStateExt;
use axum::http::Request;
use axum::routing::{get, post};
use tower::Layer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span};

use crate::handlers;
use crate::pipeline::{PipelineLayer, handle_panic};
use crate::state::AppState;

/// Prefix of every route behind the gateway pipeline.
pub const BACKEND_PREFIX: &str = "/backend";

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    let cors = build_cors_layer(&config.cors_allowed_origins);

    info!(
        max_size_mb = config.max_request_body_size / (1024 * 1024),
        "Request body size limit configured"
    );
    info!(
        environment = %config.environment,
        requests_limit = config.rate_limit.requests_limit,
        window_secs = config.rate_limit.time_window.as_secs(),
        wait_request_limit = config.rate_limit.wait_request_limit,
        cooldown_minutes = config.rate_limit.cooldown_minutes,
        bypassed = config.environment.is_development(),
        "Rate limiting configured"
    );

    let not_found =
        PipelineLayer::without_admission(state.clone()).layer(handlers::not_found.into_service());

    let backend = Router::new()
        .route("/demo", post(handlers::demo))
        .route("/echo", post(handlers::echo))
        .route_layer(CatchPanicLayer::custom(handle_panic))
        .route_layer(PipelineLayer::new(state.clone()))
        .fallback_service(not_found.clone());

    Router::new()
        .route("/", get(handlers::root))
        .route("/health-check", get(handlers::health_check))
        .nest(BACKEND_PREFIX, backend)
        .fallback_service(not_found)
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .with_state(state)
}

/// Span for one HTTP request. `request_id` is filled in by the pipeline.
fn make_request_span(req: &Request<Body>) -> Span {
    info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri(),
        request_id = tracing::field::Empty,
    )
}

/// Build CORS layer from configuration.
///
/// `["*"]` allows any origin; otherwise only the listed origins.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
