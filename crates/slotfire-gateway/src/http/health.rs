use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let engine = state.scheduler.engine();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "armed_timers": engine.armed_count(),
        "in_flight": engine.dispatcher().guard().active_count(),
    }))
}
