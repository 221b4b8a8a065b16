use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credentials for {platform}: {}", missing.join(", "))]
    MissingCredentials {
        platform: String,
        missing: Vec<&'static str>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwitchboardError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SwitchboardError::Config(_) => "CONFIG_ERROR",
            SwitchboardError::MissingCredentials { .. } => "MISSING_CREDENTIALS",
            SwitchboardError::Serialization(_) => "SERIALIZATION_ERROR",
            SwitchboardError::Io(_) => "IO_ERROR",
            SwitchboardError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;
