//! Fulfillment client errors

use thiserror::Error;

/// Whether an error is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble or a 5xx; safe to retry
    Transient,
    /// Bad request or unknown host; retrying will not help
    Permanent,
}

/// Errors that can occur when talking to the fulfillment service
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered 408, 429 or 5xx
    #[error("Fulfillment service unavailable: {0}")]
    Unavailable(String),

    /// The service does not know the host
    #[error("Host not found: {0}")]
    NotFound(String),

    /// The request was rejected (400, 409, 422)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed (401, 403)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FulfillmentError {
    /// Classifies the error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http(e) if e.is_decode() || e.is_builder() => ErrorClass::Permanent,
            Self::Http(_) | Self::Unavailable(_) => ErrorClass::Transient,
            Self::NotFound(_)
            | Self::InvalidRequest(_)
            | Self::Authentication(_)
            | Self::Serialization(_) => ErrorClass::Permanent,
        }
    }

    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Maps a non-success HTTP status to an error
    pub fn from_status(status: u16, context: String) -> Self {
        match status {
            404 => Self::NotFound(context),
            401 | 403 => Self::Authentication(context),
            408 | 429 | 500..=599 => Self::Unavailable(context),
            _ => Self::InvalidRequest(context),
        }
    }
}
