use slotfire_core::SlotfireError;
use thiserror::Error;

use crate::types::JobStatus;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Bad scheduling parameters, rejected synchronously at creation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Another job with the same collision key is executing right now.
    #[error("collision: duplicate in-flight job")]
    Collision { key: String },

    /// One executor attempt failed; the dispatcher may retry.
    #[error("{0}")]
    Executor(String),

    /// Retrying cannot help: the target is gone or the payload is unusable.
    #[error("{0}")]
    ExecutorFatal(String),

    /// Underlying SQLite / rusqlite error.
    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// A status write that would violate the job lifecycle.
    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error(transparent)]
    Core(SlotfireError),
}

impl SchedulerError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::Collision { .. } => "COLLISION",
            SchedulerError::Executor(_) => "EXECUTOR_ERROR",
            SchedulerError::ExecutorFatal(_) => "EXECUTOR_FATAL",
            SchedulerError::Persistence(_) => "PERSISTENCE_ERROR",
            SchedulerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::Core(e) => e.code(),
        }
    }

    /// Whether the dispatcher should try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::Executor(_))
    }
}

impl From<SlotfireError> for SchedulerError {
    fn from(e: SlotfireError) -> Self {
        match e {
            SlotfireError::Validation(msg) => SchedulerError::Validation(msg),
            other => SchedulerError::Core(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
