use std::time::Duration;

use thiserror::Error;

use crate::RejectionReason;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: RejectionReason },

    #[error("No price received within {waited:?}")]
    PriceUnavailable { waited: Duration },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<Error>,
    },

    #[error("Recovery did not converge after {attempts} attempts: {last}")]
    RecoveryFailed { attempts: u32, last: Box<Error> },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for a rejection the placement retry policy may try again.
    pub fn is_retryable_rejection(&self) -> bool {
        matches!(self, Error::OrderRejected { reason } if reason.is_retryable())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
