//! Building blocks of the gateway pipeline.
//!
//! - **Request context**: request id propagation and per-request metadata
//! - **Client identity**: `X-Forwarded-For` / peer address resolution
//! - **Authentication**: HS256 bearer tokens
//! - **Rate limiting**: per client and endpoint, with wait and cooldown stages
//!
//! The pieces are composed by [`crate::pipeline::PipelineLayer`].

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod request_id;

pub use auth::{Authenticator, Claims};
pub use ip::{UNKNOWN_CLIENT, client_identity};
pub use rate_limit::{Admission, RateLimited, RateLimiter, RejectReason};
pub use request_id::{REQUEST_ID_HEADER, RequestContext};
