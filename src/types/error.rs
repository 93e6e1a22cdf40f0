//! Error types for nats-gather

use std::time::Duration;

/// Main error type for scatter-gather operations
#[derive(Debug, thiserror::Error)]
pub enum GatherError {
    #[error("NATS error: {0}")]
    Transport(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request to {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    #[error("Client is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatherError {
    /// Transport failures are fatal to the operation that hit them
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Payload could not be turned into the expected type
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    pub fn is_encode(&self) -> bool {
        matches!(self, Self::Encode(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// Implement From conversions for common error types

impl From<rmp_serde::encode::Error> for GatherError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(format!("MessagePack error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for GatherError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(format!("MessagePack error: {}", err))
    }
}

/// Result type alias for nats-gather operations
pub type Result<T> = std::result::Result<T, GatherError>;
