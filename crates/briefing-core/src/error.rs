use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum BriefingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },
}

impl BriefingError {
    /// Short, stable error code for logs and CLI exit messages.
    pub fn code(&self) -> &'static str {
        match self {
            BriefingError::Config(_) => "CONFIG_ERROR",
            BriefingError::InvalidConfig { .. } => "INVALID_CONFIG",
        }
    }
}

pub type Result<T> = std::result::Result<T, BriefingError>;
