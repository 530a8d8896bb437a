//! Client identity resolution.
//!
//! The rate limiter keys its buckets on a client identity, resolved in order:
//!
//! 1. the first entry of `X-Forwarded-For`
//! 2. the peer address from [`ConnectInfo`]
//! 3. [`UNKNOWN_CLIENT`]
//!
//! # Spoofing
//!
//! `X-Forwarded-For` is client-controlled. Run the gateway behind a proxy that
//! overwrites the header, otherwise clients can pick their own bucket.
//! Requests with no resolvable identity all share the `"unknown"` bucket.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Identity shared by every request whose origin cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin<'a> {
    ForwardedFor(&'a str),
    Peer(SocketAddr),
    NotFound,
}

#[inline]
fn resolve_origin<B>(req: &Request<B>) -> Origin<'_> {
    // Format: "client, proxy1, proxy2"
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return Origin::ForwardedFor(first.trim());
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Origin::Peer(*addr);
    }

    Origin::NotFound
}

/// Resolve the client identity of a request.
///
/// Returns a borrowed `"unknown"` when nothing identifies the client; use
/// `.into_owned()` to keep it past the request.
#[inline]
pub fn client_identity<B>(req: &Request<B>) -> Cow<'static, str> {
    match resolve_origin(req) {
        Origin::ForwardedFor(ip) => Cow::Owned(ip.to_string()),
        Origin::Peer(addr) => Cow::Owned(addr.ip().to_string()),
        Origin::NotFound => Cow::Borrowed(UNKNOWN_CLIENT),
    }
}
