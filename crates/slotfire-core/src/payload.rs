//! Job payload types, shared between the scheduler engine and executor implementations.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotfireError};

/// Stored as a JSON string in the `jobs.payload` column.
///
/// The engine never looks inside; it hands the value to the executor, which
/// dispatches on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Reserve a bookable slot (court, room, table) the moment its window opens.
    SlotBooking {
        /// Venue or site identifier understood by the executor.
        venue: String,
        /// Day the slot is on.
        date: NaiveDate,
        /// Slot start time, `HH:MM`.
        time: String,
        /// Specific court/room; `None` lets the executor pick any free one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<String>,
    },
    /// Executor-defined action with free-form parameters.
    Custom {
        action: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

impl JobPayload {
    /// Discriminator as stored in the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::SlotBooking { .. } => "slot_booking",
            JobPayload::Custom { .. } => "custom",
        }
    }

    /// Structural checks. Called once when a job is created and again
    /// before the first executor attempt.
    pub fn validate(&self) -> Result<()> {
        match self {
            JobPayload::SlotBooking { venue, time, .. } => {
                if venue.trim().is_empty() {
                    return Err(SlotfireError::Validation("venue must not be empty".into()));
                }
                NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| {
                    SlotfireError::Validation(format!("slot time '{time}' is not HH:MM"))
                })?;
                Ok(())
            }
            JobPayload::Custom { action, .. } => {
                if action.trim().is_empty() {
                    return Err(SlotfireError::Validation("action must not be empty".into()));
                }
                Ok(())
            }
        }
    }

    /// One-line description used in owner notifications.
    pub fn summary(&self) -> String {
        match self {
            JobPayload::SlotBooking {
                venue,
                date,
                time,
                resource,
            } => match resource {
                Some(r) => format!("{venue} {r} on {date} at {time}"),
                None => format!("{venue} on {date} at {time}"),
            },
            JobPayload::Custom { action, .. } => format!("action '{action}'"),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Reference to a blob produced by an executor attempt (e.g. a screenshot path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File path or URL the notifier can read from.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Artifact {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_image(&self) -> bool {
        match &self.content_type {
            Some(ct) => ct.starts_with("image/"),
            None => {
                let lower = self.uri.to_ascii_lowercase();
                lower.ends_with(".png") || lower.ends_with(".jpg") || lower.ends_with(".jpeg")
            }
        }
    }
}
