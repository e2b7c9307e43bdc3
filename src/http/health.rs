//! Liveness endpoint. No project context required.

use axum::extract::State;
use axum::Json;

use super::state::AppState;
use crate::error::Result;

pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let status = state.storage.health_check()?;
    Ok(Json(serde_json::json!({
        "healthy": status.healthy,
        "latency_ms": status.latency_ms,
        "error": status.error,
    })))
}
