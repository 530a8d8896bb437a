//! Fuzz the parsers that see client-controlled header values.
//!
//! - `parse_bearer` and `Authenticator::authenticate` on `Authorization`
//! - `client_identity` on `X-Forwarded-For`
//! - `ResponseCode::from_str` on arbitrary code names
//!
//! None of them may panic.
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_headers -- -max_total_time=60
//! ```

#![no_main]

use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use backend_gateway::ResponseCode;
use backend_gateway::middleware::auth::{Authenticator, parse_bearer};
use backend_gateway::middleware::ip::client_identity;
use libfuzzer_sys::fuzz_target;

static AUTHENTICATOR: LazyLock<Authenticator> =
    LazyLock::new(|| Authenticator::new("fuzz-secret", Duration::from_secs(60)));

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_bearer(s);
        let _ = ResponseCode::from_str(s);
    }

    if let Ok(value) = HeaderValue::from_bytes(data) {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.clone());
        let _ = AUTHENTICATOR.authenticate(&headers);

        if let Ok(req) = Request::builder()
            .header("x-forwarded-for", value)
            .body(Body::empty())
        {
            let _ = client_identity(&req);
        }
    }
});
