use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use slotfire_core::SlotfireError;
use slotfire_scheduler::SchedulerError;
use tracing::error;

/// Error body: `{"error": "...", "code": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    /// Request well-formed JSON but semantically unusable.
    Invalid(String),
    Scheduler(SchedulerError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Scheduler(e) => match e {
                SchedulerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
                SchedulerError::Collision { .. } | SchedulerError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                SchedulerError::Core(SlotfireError::Serialization(_)) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Invalid(_) => "VALIDATION_ERROR",
            ApiError::Scheduler(e) => e.code(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        ApiError::Scheduler(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Unauthorized => {
                "Unauthorized. Set 'Authorization: Bearer <your-token>' header.".to_string()
            }
            ApiError::Invalid(msg) => msg.clone(),
            ApiError::Scheduler(e) => e.to_string(),
        };
        if status.is_server_error() {
            error!(code = self.code(), error = %message, "request failed");
        }
        (
            status,
            Json(json!({ "error": message, "code": self.code() })),
        )
            .into_response()
    }
}
