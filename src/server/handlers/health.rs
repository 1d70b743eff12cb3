//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;

use super::super::state::AppState;
use super::super::types::HealthResponse;

/// GET /api/v1/health
///
/// - Healthy: 200 + `{status: "ok", store, version, timestamp}`
/// - Storage unreachable: 503 + `{status: "unavailable", ...}`
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.ledger.store();
    let (status, label) = match store.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!(store = store.name(), error = %e, "[HEALTH] storage ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        status,
        Json(HealthResponse {
            status: label,
            store: store.name(),
            version: env!("GIT_HASH"),
            timestamp: Utc::now(),
        }),
    )
}
