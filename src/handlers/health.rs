//! Liveness endpoints, served outside the gateway pipeline.
//!
//! - `GET /` - server is up
//! - `GET /health-check` - liveness check for load balancers

use axum::Json;
use serde::Serialize;
use tracing::instrument;

/// Plain status body of the liveness endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub status: bool,
    pub message: &'static str,
}

#[instrument]
pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: true,
        message: "server is running",
    })
}

#[instrument]
pub async fn health_check() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: true,
        message: "server health ok",
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_root_body() {
        let Json(body) = root().await;
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"status": true, "message": "server is running"})
        );
    }

    #[tokio::test]
    async fn test_health_check_body() {
        let Json(body) = health_check().await;
        assert_eq!(body.message, "server health ok");
        assert!(body.status);
    }
}
