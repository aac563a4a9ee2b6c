//! Error types for the discovery engine.

use upnp_core::{CoreError, ErrorCode};

/// Error type for SSDP operations.
///
/// Malformed datagrams from the network never surface here; they are
/// dropped and logged by the receive loop. These errors describe failures
/// of calls the application made.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Socket creation, bind, multicast join or send failed
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// An SSDP message could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A search target or argument was rejected
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// No control point or device is registered with the engine
    #[error("No {0} registered")]
    NotRegistered(&'static str),

    /// Timer scheduling failed
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl DiscoveryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DiscoveryError::Network(_) => ErrorCode::NetworkError,
            DiscoveryError::Parse(_) => ErrorCode::BadResponse,
            DiscoveryError::InvalidParam(_) => ErrorCode::InvalidParam,
            DiscoveryError::NotRegistered(_) => ErrorCode::InvalidHandle,
            DiscoveryError::Core(e) => e.code(),
        }
    }
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
