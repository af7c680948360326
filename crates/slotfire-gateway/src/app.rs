use axum::{
    routing::{get, post},
    Router,
};
use slotfire_core::config::SlotfireConfig;
use slotfire_scheduler::SchedulerHandle;
use std::sync::Arc;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: SlotfireConfig,
    pub scheduler: SchedulerHandle,
}

impl AppState {
    pub fn new(config: SlotfireConfig, scheduler: SchedulerHandle) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/jobs",
            post(crate::http::jobs::create_job).get(crate::http::jobs::list_jobs),
        )
        .route(
            "/jobs/{id}",
            get(crate::http::jobs::get_job).delete(crate::http::jobs::cancel_job),
        )
        .route("/stats", get(crate::http::jobs::stats))
        .route("/purge", post(crate::http::jobs::purge))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
