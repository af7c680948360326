//! Owner notification backends.
//!
//! The owner id doubles as the Telegram chat id when the Telegram backend is
//! configured. Without it, notifications only go to the log.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use slotfire_core::{config::TelegramConfig, Artifact, OwnerId};
use slotfire_scheduler::{Notifier, NotifyError};
use tracing::{debug, info, warn};

/// Writes every notification to the log at INFO.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        owner: &OwnerId,
        message: &str,
        attachment: Option<&Artifact>,
    ) -> Result<(), NotifyError> {
        info!(
            owner = %owner,
            attachment = attachment.map(|a| a.uri.as_str()),
            "{message}"
        );
        Ok(())
    }
}

/// Telegram Bot API sender.
pub struct TelegramNotifier {
    client: reqwest::Client,
    base: String,
}

impl TelegramNotifier {
    pub fn new(cfg: &TelegramConfig) -> anyhow::Result<Self> {
        if cfg.bot_token.trim().is_empty() {
            anyhow::bail!("notifier.telegram.bot_token is empty");
        }
        let client = reqwest::Client::builder()
            .build()
            .context("building Telegram HTTP client")?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", cfg.api_base.trim_end_matches('/'), cfg.bot_token),
        })
    }

    async fn post_json(&self, method: &str, body: Value) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(format!("{}/{method}", self.base))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("telegram {method}: {e}")))?;
        check(method, resp).await
    }

    async fn post_file(
        &self,
        method: &str,
        field: &str,
        chat_id: &str,
        path: &Path,
    ) -> Result<(), NotifyError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| NotifyError::Delivery(format!("reading {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field.to_string(), Part::bytes(bytes).file_name(file_name));
        let resp = self
            .client
            .post(format!("{}/{method}", self.base))
            .multipart(form)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("telegram {method}: {e}")))?;
        check(method, resp).await
    }

    async fn send_attachment(&self, chat_id: &str, artifact: &Artifact) -> Result<(), NotifyError> {
        let (method, field) = if artifact.is_image() {
            ("sendPhoto", "photo")
        } else {
            ("sendDocument", "document")
        };
        if is_remote(&artifact.uri) {
            self.post_json(method, json!({ "chat_id": chat_id, field: artifact.uri }))
                .await
        } else {
            self.post_file(method, field, chat_id, Path::new(&artifact.uri))
                .await
        }
    }
}

async fn check(method: &str, resp: reqwest::Response) -> Result<(), NotifyError> {
    let status = resp.status();
    if status.is_success() {
        debug!(method, "telegram delivered");
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(NotifyError::Delivery(format!(
        "telegram {method} returned {status}: {body}"
    )))
}

fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

#[async_trait]
impl Notifier for TelegramNotifier {
    /// The text goes out on its own first; the attachment follows and a
    /// failure to send it only costs the attachment.
    async fn send(
        &self,
        owner: &OwnerId,
        message: &str,
        attachment: Option<&Artifact>,
    ) -> Result<(), NotifyError> {
        let chat_id = owner.as_str();
        self.post_json("sendMessage", json!({ "chat_id": chat_id, "text": message }))
            .await?;

        if let Some(artifact) = attachment {
            if let Err(e) = self.send_attachment(chat_id, artifact).await {
                warn!(owner = %owner, uri = %artifact.uri, error = %e, "attachment not delivered");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{Path as UrlPath, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(String, String, String)>>>;

    /// Fake Bot API recording (method, content-type, body) per call.
    async fn fake_api(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/{bot}/{method}",
                post(
                    move |State(seen): State<Seen>,
                          UrlPath((_bot, method)): UrlPath<(String, String)>,
                          headers: HeaderMap,
                          body: Bytes| async move {
                        let ct = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        let body = String::from_utf8_lossy(&body).into_owned();
                        seen.lock().unwrap().push((method, ct, body));
                        status
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn notifier(base: &str) -> TelegramNotifier {
        TelegramNotifier::new(&TelegramConfig {
            bot_token: "123:abc".into(),
            api_base: base.into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn plain_message_uses_send_message() {
        let (base, seen) = fake_api(StatusCode::OK).await;
        notifier(&base)
            .send(&OwnerId::from("42"), "Done: booking", None)
            .await
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "sendMessage");
        let body: Value = serde_json::from_str(&seen[0].2).unwrap();
        assert_eq!(body["chat_id"], "42");
        assert_eq!(body["text"], "Done: booking");
    }

    #[tokio::test]
    async fn remote_image_is_sent_by_url() {
        let (base, seen) = fake_api(StatusCode::OK).await;
        let shot = Artifact::new("https://cdn.example/shot.png");
        notifier(&base)
            .send(&OwnerId::from("42"), "Done", Some(&shot))
            .await
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "sendMessage");
        assert_eq!(seen[1].0, "sendPhoto");
        let body: Value = serde_json::from_str(&seen[1].2).unwrap();
        assert_eq!(body["photo"], "https://cdn.example/shot.png");
    }

    #[tokio::test]
    async fn local_file_is_uploaded_as_multipart() {
        let (base, seen) = fake_api(StatusCode::OK).await;
        let dir = std::env::temp_dir().join(format!("slotfire-notify-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("receipt.txt");
        std::fs::write(&file, "court 3, 18:00").unwrap();

        let doc = Artifact::new(file.to_string_lossy());
        notifier(&base)
            .send(&OwnerId::from("42"), "Done", Some(&doc))
            .await
            .unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "sendMessage");
        assert_eq!(seen[1].0, "sendDocument");
        assert!(seen[1].1.starts_with("multipart/form-data"));
        assert!(seen[1].2.contains("court 3, 18:00"));
        assert!(seen[1].2.contains("receipt.txt"));
    }

    #[tokio::test]
    async fn missing_local_file_still_delivers_text() {
        let (base, seen) = fake_api(StatusCode::OK).await;
        notifier(&base)
            .send(
                &OwnerId::from("42"),
                "Done",
                Some(&Artifact::new("/nonexistent/slotfire/shot.png")),
            )
            .await
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "sendMessage");
        let body: Value = serde_json::from_str(&seen[0].2).unwrap();
        assert_eq!(body["text"], "Done");
    }

    #[tokio::test]
    async fn rejected_text_skips_attachment() {
        let (base, seen) = fake_api(StatusCode::FORBIDDEN).await;
        let shot = Artifact::new("https://cdn.example/shot.png");
        let err = notifier(&base)
            .send(&OwnerId::from("42"), "Done", Some(&shot))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn api_rejection_is_a_delivery_error() {
        let (base, _) = fake_api(StatusCode::FORBIDDEN).await;
        let err = notifier(&base)
            .send(&OwnerId::from("42"), "hi", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn empty_token_is_rejected() {
        let cfg = TelegramConfig {
            bot_token: " ".into(),
            api_base: "https://api.telegram.org".into(),
        };
        assert!(TelegramNotifier::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        LogNotifier
            .send(&OwnerId::from("o"), "hello", None)
            .await
            .unwrap();
    }
}
