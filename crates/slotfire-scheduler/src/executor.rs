use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slotfire_core::{Artifact, JobPayload};
use thiserror::Error;

use crate::error::SchedulerError;

/// Result of one executor attempt that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

impl ExecutionReport {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            artifact: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// Ways an attempt can end without a report.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// Recoverable; the next attempt may succeed.
    #[error("{0}")]
    Failed(String),

    /// The target is gone or will never accept this request.
    #[error("{0}")]
    Fatal(String),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("executor panicked: {0}")]
    Panicked(String),

    /// The payload is malformed; retrying the same payload is pointless.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl ExecutorError {
    /// Whether the retry loop must stop after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutorError::Fatal(_) | ExecutorError::InvalidPayload(_))
    }
}

impl From<ExecutorError> for SchedulerError {
    fn from(e: ExecutorError) -> Self {
        if e.is_fatal() {
            SchedulerError::ExecutorFatal(e.to_string())
        } else {
            SchedulerError::Executor(e.to_string())
        }
    }
}

/// Performs the deferred action. The engine never looks inside the payload.
///
/// `timeout` is the budget for this attempt; the dispatcher enforces it
/// independently, so implementations may use it only as a hint for their
/// own I/O deadlines.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        payload: &JobPayload,
        timeout: Duration,
    ) -> Result<ExecutionReport, ExecutorError>;
}
