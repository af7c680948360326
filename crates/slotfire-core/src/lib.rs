//! `slotfire-core`: configuration, error type, identifiers and job payloads
//! shared by the scheduler engine and the gateway binary.

pub mod config;
pub mod error;
pub mod payload;
pub mod types;

pub use error::{Result, SlotfireError};
pub use payload::{Artifact, JobPayload};
pub use types::{CollisionKey, JobId, OwnerId, ResourceKey};
