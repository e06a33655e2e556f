//! Health check handlers.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct StoreHealthResponse {
    pub status: String,
    pub store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Store connectivity check (readiness probe).
pub async fn store_health(
    State(state): State<AppState>,
) -> Result<Json<StoreHealthResponse>, (StatusCode, Json<StoreHealthResponse>)> {
    let start = Instant::now();
    match state.tasks.store().ping().await {
        Ok(()) => Ok(Json(StoreHealthResponse {
            status: "healthy".to_string(),
            store: "connected".to_string(),
            error: None,
            latency_ms: Some(start.elapsed().as_millis() as u64),
        })),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StoreHealthResponse {
                status: "unhealthy".to_string(),
                store: "disconnected".to_string(),
                error: Some(e.to_string()),
                latency_ms: None,
            }),
        )),
    }
}
