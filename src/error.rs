use std::any::Any;
use std::panic::Location;

use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::middleware::rate_limit::RateLimited;
use crate::response::{Envelope, ResponseCode};

/// Failure modes of the external AI/compute dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamError {
    /// The AI process itself failed.
    Process,
    /// The AI server answered with garbage or not at all.
    BadGateway,
    /// The GPU service is not accepting work.
    ServiceUnavailable,
}

/// Where and what an internal failure was, kept out of the client response
/// and written to the error log under the request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub exception_type: String,
    pub exception_message: String,
    pub filename: String,
    pub line_number: u32,
}

impl Diagnostics {
    #[track_caller]
    pub fn capture(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            exception_type: exception_type.into(),
            exception_message: message.into(),
            filename: location.file().to_string(),
            line_number: location.line(),
        }
    }
}

/// Application-wide error types.
///
/// Every variant maps to exactly one [`ResponseCode`] through
/// [`AppError::response_code`]; the pipeline never inspects errors any other way.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authorization header is missing")]
    AuthMissing,

    #[error("Invalid or expired token: {0}")]
    AuthInvalid(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("Invalid request: {message}")]
    Validation {
        message: String,
        details: serde_json::Value,
    },

    #[error("Internal error: {}", .0.exception_message)]
    Internal(Diagnostics),

    #[error("Upstream AI service error: {0:?}")]
    Upstream(UpstreamError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Internal error carrying the caller's location.
    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(Diagnostics::capture("InternalError", message))
    }

    /// Wrap any error as internal, recording its type name and the caller's location.
    #[track_caller]
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error,
    {
        AppError::Internal(Diagnostics::capture(
            std::any::type_name::<E>(),
            err.to_string(),
        ))
    }

    /// Convert a caught handler panic into an internal error.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else {
            "unknown panic payload".to_string()
        };
        AppError::Internal(Diagnostics {
            exception_type: "panic".to_string(),
            exception_message: message,
            filename: "unknown".to_string(),
            line_number: 0,
        })
    }

    pub fn validation(message: impl Into<String>, details: serde_json::Value) -> Self {
        AppError::Validation {
            message: message.into(),
            details,
        }
    }

    /// The fixed response code for this error kind.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            AppError::AuthMissing => ResponseCode::AuthorizationMissing,
            AppError::AuthInvalid(_) => ResponseCode::Unauthorized,
            AppError::RateLimited(_) => ResponseCode::TooManyRequests,
            AppError::Validation { .. } => ResponseCode::BadRequest,
            AppError::Internal(_) | AppError::Config(_) => ResponseCode::ServerError,
            AppError::Upstream(UpstreamError::Process) => ResponseCode::AiError,
            AppError::Upstream(UpstreamError::BadGateway) => ResponseCode::AiBadGateway,
            AppError::Upstream(UpstreamError::ServiceUnavailable) => {
                ResponseCode::AiServiceUnavailable
            }
        }
    }

    /// Diagnostics to be logged, present only for internal failures.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            AppError::Internal(diagnostics) => Some(diagnostics),
            _ => None,
        }
    }

    /// Client-facing envelope. Internal details never reach it.
    pub fn to_envelope(&self) -> Envelope {
        let envelope = Envelope::new(self.response_code());
        match self {
            AppError::AuthInvalid(_) => envelope.message("Invalid or expired token"),
            AppError::Validation { message, details } => {
                envelope.message(message.as_str()).details(details.clone())
            }
            _ => envelope,
        }
    }
}

impl From<serde_json::Error> for AppError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        AppError::from_error(err)
    }
}

impl From<anyhow::Error> for AppError {
    #[track_caller]
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(Diagnostics::capture("anyhow::Error", format!("{err:#}")))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = self.to_envelope().into_response();
        if let AppError::Internal(diagnostics) = self {
            response.extensions_mut().insert(diagnostics);
        }
        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_auth_errors_share_status_but_not_message() {
        let missing = AppError::AuthMissing.to_envelope();
        let invalid = AppError::AuthInvalid("ExpiredSignature".to_string()).to_envelope();

        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(missing.body().message, invalid.body().message);
        assert_eq!(invalid.body().message, "Invalid or expired token");
    }

    #[test]
    fn test_internal_error_records_caller_location() {
        let err = AppError::internal("boom");
        let diagnostics = err.diagnostics().unwrap();

        assert!(diagnostics.filename.ends_with("error.rs"));
        assert!(diagnostics.line_number > 0);
        assert_eq!(diagnostics.exception_message, "boom");
    }

    #[test]
    fn test_internal_error_envelope_hides_details() {
        let err = AppError::from_error(std::io::Error::other("disk on fire"));
        let envelope = err.to_envelope();

        assert_eq!(envelope.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_string(envelope.body()).unwrap();
        assert!(!body.contains("disk on fire"));
        assert!(
            err.diagnostics()
                .unwrap()
                .exception_type
                .contains("io::error::Error")
        );
    }

    #[test]
    fn test_internal_error_response_carries_diagnostics_extension() {
        let response = AppError::internal("boom").into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<Diagnostics>().is_some());
        assert!(response.extensions().get::<Envelope>().is_some());
    }

    #[test]
    fn test_validation_error_keeps_details() {
        let err = AppError::validation("Bad Request", json!([{"loc": "body"}]));
        let envelope = err.to_envelope();

        assert_eq!(envelope.status(), StatusCode::BAD_REQUEST);
        assert_eq!(envelope.body().details, json!([{"loc": "body"}]));
    }

    #[test]
    fn test_upstream_errors_map_to_ai_codes() {
        assert_eq!(
            AppError::Upstream(UpstreamError::Process).response_code(),
            ResponseCode::AiError
        );
        assert_eq!(
            AppError::Upstream(UpstreamError::BadGateway)
                .to_envelope()
                .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Upstream(UpstreamError::ServiceUnavailable)
                .to_envelope()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_panic_payload_message_is_extracted() {
        let err = AppError::from_panic(Box::new("handler exploded"));
        assert_eq!(
            err.diagnostics().unwrap().exception_message,
            "handler exploded"
        );

        let err = AppError::from_panic(Box::new(String::from("owned message")));
        assert_eq!(err.diagnostics().unwrap().exception_message, "owned message");
    }
}
