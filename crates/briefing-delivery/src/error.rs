use briefing_scheduler::{GenerateError, TransportError};
use thiserror::Error;

/// Errors raised by the delivery adapters.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// SMTP transport-level failure (authentication, connection, refusal).
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// A sender or recipient address could not be parsed.
    #[error("address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("message build error: {0}")]
    Build(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<DeliveryError> for TransportError {
    fn from(e: DeliveryError) -> Self {
        let message = e.to_string();
        match e {
            DeliveryError::Smtp(inner) if inner.is_permanent() => TransportError::Rejected(message),
            DeliveryError::Address(_) => TransportError::Rejected(message),
            DeliveryError::Build(msg) => TransportError::Build(msg),
            _ => TransportError::Unavailable(message),
        }
    }
}

impl From<DeliveryError> for GenerateError {
    fn from(e: DeliveryError) -> Self {
        let message = e.to_string();
        match e {
            DeliveryError::Api { status, .. } if status >= 500 || status == 429 => {
                GenerateError::Unavailable(message)
            }
            DeliveryError::Http(_) => GenerateError::Unavailable(message),
            DeliveryError::Parse(msg) => GenerateError::InvalidResponse(msg),
            _ => GenerateError::Failed(message),
        }
    }
}
