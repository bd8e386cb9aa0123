//! Liveness and readiness

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Process is up. Never touches the data store.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Drive the connection gate and report whether requests can be served
pub async fn ready(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    match state.gate.ensure_ready().await {
        Ok(_) => {
            let status = state.gate.status().await;
            Ok(Json(json!({ "status": status })))
        }
        Err(err) => {
            tracing::warn!(error = %err, "Readiness check failed");
            Err(ApiError::ServiceUnavailable {
                retry_after: state.gate.retry_in().await,
            })
        }
    }
}
