//! Routes behind the gateway pipeline.
//!
//! # Endpoints
//!
//! - `POST /backend/demo` - canned success, logged as AI traffic
//! - `POST /backend/echo` - returns the JSON body it was sent
//!
//! Both need a bearer token and are rate limited per client and endpoint.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::logging::GeneralLogKind;
use crate::middleware::request_id::RequestContext;
use crate::response::{Envelope, ResponseCode};
use crate::state::AppState;

/// Canned AI-style response.
///
/// # Response Body
///
/// ```json
/// {"code": "HTTP_200_SUCCESS", "message": "Success", "data": {"resp": "Success"}, "error": false, "details": {}}
/// ```
#[instrument(skip_all)]
pub async fn demo(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> AppResult<Envelope> {
    let data = json!({ "resp": "Success" });
    state
        .logger
        .for_request(&ctx.request_id)
        .general_log(GeneralLogKind::Ai, data.clone(), None, false);

    Ok(Envelope::build(
        ResponseCode::Success,
        Some(data),
        None,
        Some("Success"),
    ))
}

/// Echo a JSON body back as `data`.
///
/// Malformed or non-JSON bodies are a 400 with the parser's complaint in
/// `details`.
#[instrument(skip_all)]
pub async fn echo(payload: Result<Json<Value>, JsonRejection>) -> AppResult<Envelope> {
    let Json(body) = payload.map_err(|rejection| {
        AppError::validation(
            "Bad Request",
            json!([{ "loc": ["body"], "msg": rejection.body_text() }]),
        )
    })?;

    Ok(Envelope::new(ResponseCode::Success).data(body))
}

/// Fallback for unknown paths.
pub async fn not_found() -> Envelope {
    Envelope::new(ResponseCode::NotFound)
}
