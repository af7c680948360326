//! HTTP webhook executor.
//!
//! Each attempt POSTs `{"job": <payload>, "timeout_secs": n}` to the
//! configured URL. The target answers with
//! `{"success": bool, "message": "...", "artifact": {...}}`.
//!
//! | Response                     | Outcome                    |
//! |------------------------------|----------------------------|
//! | 2xx, `success: true`         | success                    |
//! | 2xx, `success: false`        | failed attempt, retried    |
//! | 404 / 410                    | fatal, no more attempts    |
//! | other status, network error  | failed attempt, retried    |

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use slotfire_core::{config::ExecutorConfig, Artifact, JobPayload};
use slotfire_scheduler::{ExecutionReport, Executor, ExecutorError};
use tracing::debug;

pub struct WebhookExecutor {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    artifact: Option<Artifact>,
}

impl WebhookExecutor {
    pub fn from_config(cfg: &ExecutorConfig) -> anyhow::Result<Self> {
        let url = cfg
            .webhook_url
            .clone()
            .context("executor.webhook_url is not set; nothing to run jobs against")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("building webhook HTTP client")?;
        Ok(Self {
            client,
            url,
            token: cfg.webhook_token.clone(),
        })
    }
}

#[async_trait]
impl Executor for WebhookExecutor {
    async fn run(
        &self,
        payload: &JobPayload,
        timeout: Duration,
    ) -> Result<ExecutionReport, ExecutorError> {
        let mut req = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(&json!({ "job": payload, "timeout_secs": timeout.as_secs() }));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::TimedOut(timeout)
            } else {
                ExecutorError::Failed(format!("webhook request failed: {e}"))
            }
        })?;

        let status = resp.status();
        debug!(%status, kind = payload.kind(), "webhook responded");
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ExecutorError::Fatal(format!("target unavailable ({status})")));
        }
        if !status.is_success() {
            return Err(ExecutorError::Failed(format!("webhook returned {status}")));
        }

        let reply: WebhookReply = resp
            .json()
            .await
            .map_err(|e| ExecutorError::Failed(format!("unreadable webhook response: {e}")))?;
        let message = reply.message.unwrap_or_else(|| {
            if reply.success {
                "completed".to_string()
            } else {
                "target reported failure".to_string()
            }
        });
        Ok(ExecutionReport {
            success: reply.success,
            message,
            artifact: reply.artifact,
        })
    }
}
