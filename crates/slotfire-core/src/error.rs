use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlotfireError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SlotfireError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SlotfireError::Config(_) => "CONFIG_ERROR",
            SlotfireError::Validation(_) => "VALIDATION_ERROR",
            SlotfireError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SlotfireError>;
