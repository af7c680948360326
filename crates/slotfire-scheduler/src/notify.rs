use async_trait::async_trait;
use slotfire_core::{Artifact, OwnerId};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Closed,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Tells a job's owner what happened. Fire-and-forget from the engine's
/// point of view: errors are logged by the caller and never change a job's
/// status.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        owner: &OwnerId,
        message: &str,
        attachment: Option<&Artifact>,
    ) -> Result<(), NotifyError>;
}

/// A message queued for delivery by [`ChannelNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub owner: OwnerId,
    pub message: String,
    pub attachment: Option<Artifact>,
}

/// Hands notifications to an mpsc channel so a separate task can route them.
///
/// Uses `try_send`: a full channel drops the message rather than stalling a
/// dispatcher run.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(
        &self,
        owner: &OwnerId,
        message: &str,
        attachment: Option<&Artifact>,
    ) -> Result<(), NotifyError> {
        let note = Notification {
            owner: owner.clone(),
            message: message.to_string(),
            attachment: attachment.cloned(),
        };
        self.tx.try_send(note).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
            mpsc::error::TrySendError::Full(_) => {
                NotifyError::Delivery("notification channel full".into())
            }
        })
    }
}
