//! Error types for callbridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Codec errors
    #[error("Invalid audio format: {message}")]
    InvalidFormat { message: String },

    // Upstream errors
    #[error("Upstream connection is not open")]
    NotConnected,

    #[error("Upstream protocol violation: {message}")]
    UpstreamProtocol { message: String },

    #[error("Upstream transport failure: {message}")]
    UpstreamTransport { message: String },

    #[error("Upstream reconnect attempts exhausted after {attempts} tries")]
    BackoffExhausted { attempts: u32 },

    // Session errors
    #[error("Session {session_id} is past its terminal status")]
    SessionGone { session_id: String },

    #[error("Invalid session status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl BridgeError {
    /// Short machine-readable kind, used in error events.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::ConfigInvalidValue { .. } => "CONFIG_INVALID",
            BridgeError::InvalidFormat { .. } => "INVALID_FORMAT",
            BridgeError::NotConnected => "NOT_CONNECTED",
            BridgeError::UpstreamProtocol { .. } => "UPSTREAM_PROTOCOL",
            BridgeError::UpstreamTransport { .. } => "UPSTREAM_TRANSPORT",
            BridgeError::BackoffExhausted { .. } => "BACKOFF_EXHAUSTED",
            BridgeError::SessionGone { .. } => "SESSION_GONE",
            BridgeError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::UpstreamTransport {
            message: err.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, BridgeError>;
