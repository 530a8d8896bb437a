//! # Backend Gateway
//!
//! An HTTP front door that puts every backend route behind one pipeline:
//!
//! - **Identity**: request ids from `X-Request-Id` or fresh UUIDs, echoed in a
//!   `request_id` cookie and the `x-request-id` header
//! - **Security**: HS256 bearer tokens with distinct missing/invalid errors
//! - **Rate limiting**: per client and endpoint, escalating from delays to
//!   cooldowns
//! - **Observability**: structured request/response/error records keyed by
//!   request id, Prometheus metrics
//! - **Uniform responses**: one JSON envelope driven by a closed code table
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Trace → CORS → Pipeline (log → auth → rate limit) → Panic  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (root, health-check, demo, echo)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Envelope + respond (cookie, location, response log)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backend_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config);
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! ENVIRONMENT=PRODUCTION SECRET_KEY=change-me RATE_LIMIT_REQUESTS=30 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod response;
pub mod routes;
pub mod state;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use config::{Config, Environment};
pub use error::{AppError, AppResult};
pub use response::{Envelope, ResponseCode};
pub use routes::build_router;
pub use state::AppState;
