//! Bearer token authentication.
//!
//! Protected routes expect an HS256 JWT signed with `SECRET_KEY`:
//!
//! ```bash
//! curl -H "Authorization: Bearer <token>" http://localhost:8000/backend/demo
//! ```
//!
//! Two failure kinds are kept apart so clients can tell them apart:
//!
//! - no usable `Authorization: Bearer` credential → [`AppError::AuthMissing`]
//! - a credential that does not verify (bad signature, malformed, expired)
//!   → [`AppError::AuthInvalid`]
//!
//! Both end up as 401 responses with different messages.

use std::fmt;
use std::time::Duration;

use axum::http::{HeaderMap, header};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::utils::generate_id;

/// Length of generated token ids.
const TOKEN_ID_LEN: usize = 16;

/// Authorization scheme accepted by the gateway.
pub const BEARER_SCHEME: &str = "Bearer";

/// Claims carried by access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject the token was issued to.
    pub sub: String,
    /// Expiration (Unix timestamp, seconds).
    pub exp: i64,
    /// Issued at (Unix timestamp, seconds).
    pub iat: i64,
    /// Token id.
    #[serde(default)]
    pub jti: String,
}

/// Split an `Authorization` header value into its bearer credential.
///
/// The scheme is matched case-insensitively. Returns `None` for other schemes
/// and for empty credentials.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, credential) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return None;
    }
    let credential = credential.trim();
    (!credential.is_empty()).then_some(credential)
}

/// Issues and verifies access tokens.
#[derive(Clone)]
pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
}

impl Authenticator {
    pub fn new(secret: &str, token_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            token_ttl,
        }
    }

    /// Verify the bearer token in `headers` and return its subject.
    pub fn authenticate(&self, headers: &HeaderMap) -> AppResult<String> {
        let credential = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
            .ok_or(AppError::AuthMissing)?;

        let data = decode::<Claims>(credential, &self.decoding_key, &self.validation).map_err(
            |e| {
                debug!(error = %e, "Rejected bearer token");
                AppError::AuthInvalid(e.to_string())
            },
        )?;

        Ok(data.claims.sub)
    }

    /// Issue a token for `subject` with the configured lifetime.
    pub fn issue_token(&self, subject: &str) -> AppResult<String> {
        self.issue_token_with_ttl(subject, self.token_ttl)
    }

    pub fn issue_token_with_ttl(&self, subject: &str, ttl: Duration) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.sign(&Claims {
            sub: subject.to_string(),
            exp: now.saturating_add(ttl),
            iat: now,
            jti: generate_id(TOKEN_ID_LEN),
        })
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(AppError::from_error)
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("algorithm", &Algorithm::HS256)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}
