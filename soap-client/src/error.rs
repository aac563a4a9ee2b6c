//! Error types for the SOAP client

use thiserror::Error;
use upnp_core::ErrorCode;

/// Errors that can occur during SOAP and GENA requests
#[derive(Debug, Error)]
pub enum SoapError {
    /// Connection, send or receive failed; the peer may be unreachable
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The URL could not be parsed or has no host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The peer answered with something that is not a valid response
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// The response body exceeded the configured limit
    #[error("Response body exceeds {0} bytes")]
    TooLarge(usize),

    /// The device rejected the action with a UPnP error
    #[error("Action failed: UPnP error {code}: {description}")]
    Action { code: i32, description: String },

    /// Error status without a SOAP fault body
    #[error("HTTP error status {0}")]
    Http(u16),

    /// A SUBSCRIBE or UNSUBSCRIBE request was refused
    #[error("{method} refused with HTTP {status}")]
    Unaccepted { method: &'static str, status: u16 },
}

impl SoapError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SoapError::Network(_) => ErrorCode::SocketConnect,
            SoapError::InvalidUrl(_) => ErrorCode::InvalidUrl,
            SoapError::Parse(_) | SoapError::TooLarge(_) | SoapError::Http(_) => {
                ErrorCode::BadResponse
            }
            SoapError::Action { .. } => ErrorCode::InvalidAction,
            SoapError::Unaccepted { method, .. } if *method == "UNSUBSCRIBE" => {
                ErrorCode::UnsubscribeUnaccepted
            }
            SoapError::Unaccepted { .. } => ErrorCode::SubscribeUnaccepted,
        }
    }

    /// The errorCode a device put in its fault, if this is an action error.
    pub fn upnp_error_code(&self) -> Option<i32> {
        match self {
            SoapError::Action { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SoapError>;
