//! HTTP request handlers

use crate::api::{HealthResponse, HealthStatus};
use axum::{extract::Path, http::StatusCode, Json};

/// Health check - liveness probe
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Alive,
    })
}

/// Health check - readiness probe
pub async fn readiness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Ready,
    })
}

/// Protected placeholder: read a user
pub async fn get_user(Path(user_name): Path<String>) -> String {
    format!("Hello!! {} You have reached the Get Users", user_name)
}

/// Protected placeholder: update a user
pub async fn update_user(Path(user_name): Path<String>) -> String {
    format!("Hello!! {} You have access to edits", user_name)
}

/// Fallback for unrouted paths; still behind the gate
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
