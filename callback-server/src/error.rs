//! Error types for the callback server.

use upnp_core::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum CallbackServerError {
    /// Every port in the configured range was taken
    #[error("No available port found in range {start}-{end}")]
    NoPortAvailable { start: u16, end: u16 },

    /// A NOTIFY body is not a valid property set
    #[error("Invalid property set: {0}")]
    PropertySet(String),

    /// The property set could not be serialized
    #[error("Property set serialization failed: {0}")]
    Serialize(String),
}

impl CallbackServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CallbackServerError::NoPortAvailable { .. } => ErrorCode::SocketBind,
            CallbackServerError::PropertySet(_) => ErrorCode::BadHttpMsg,
            CallbackServerError::Serialize(_) => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, CallbackServerError>;
