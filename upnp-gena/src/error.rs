//! Error types for the GENA state machines.

use callback_server::CallbackServerError;
use soap_client::SoapError;
use upnp_core::{CoreError, ErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum GenaError {
    /// SUBSCRIBE, renew or UNSUBSCRIBE request failed on the wire
    #[error(transparent)]
    Soap(#[from] SoapError),

    /// Property set could not be built or parsed
    #[error(transparent)]
    PropertySet(#[from] CallbackServerError),

    /// Timer scheduling failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No subscription with this SID
    #[error("Unknown subscription: {0}")]
    InvalidSid(String),

    /// No evented service with this ID
    #[error("Unknown service: {0}")]
    InvalidService(String),

    /// The service ID is already registered with the publisher
    #[error("Service already registered: {0}")]
    AlreadyRegistered(String),

    /// NOTIFY could not be delivered to a callback URL
    #[error("NOTIFY to {url} failed: {reason}")]
    Notify { url: String, reason: String },

    /// A subscriber answered NOTIFY with a non-success status
    #[error("NOTIFY to {url} refused with HTTP {status}")]
    NotifyUnaccepted { url: String, status: u16 },

    /// A blocking request task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl GenaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GenaError::Soap(e) => e.code(),
            GenaError::PropertySet(e) => e.code(),
            GenaError::Core(e) => e.code(),
            GenaError::InvalidSid(_) => ErrorCode::InvalidSid,
            GenaError::InvalidService(_) => ErrorCode::InvalidService,
            GenaError::AlreadyRegistered(_) => ErrorCode::AlreadyRegistered,
            GenaError::Notify { .. } => ErrorCode::SocketConnect,
            GenaError::NotifyUnaccepted { .. } => ErrorCode::NotifyUnaccepted,
            GenaError::Worker(_) => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, GenaError>;
