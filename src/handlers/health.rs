//! Liveness endpoints.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PingReply {
    pub message: String,
}

/// Format the ping reply for `now`.
fn pang(now: chrono::DateTime<chrono::Utc>) -> PingReply {
    PingReply {
        message: format!("Pang {}", now.format("%Y-%m-%d %H:%M:%SZ")),
    }
}

#[utoipa::path(
    get,
    path = "/api/ping",
    tag = "Health",
    operation_id = "Ping",
    responses((status = 200, description = "Pong with the server time", body = PingReply))
)]
pub async fn ping() -> Response {
    Json(pang(chrono::Utc::now())).into_response()
}

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses((status = 200, description = "Health check OK"))
)]
pub async fn health_check() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}
