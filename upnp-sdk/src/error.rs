use callback_server::CallbackServerError;
use gena::GenaError;
use soap_client::SoapError;
use thiserror::Error;
use upnp_core::{CoreError, ErrorCode};
use upnp_discovery::DiscoveryError;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("SOAP error: {0}")]
    Soap(#[from] SoapError),

    #[error("Callback server error: {0}")]
    CallbackServer(#[from] CallbackServerError),

    #[error("Eventing error: {0}")]
    Gena(#[from] GenaError),

    /// The handle was never issued or has been unregistered
    #[error("Invalid handle: {0}")]
    InvalidHandle(i32),

    /// A handle of this kind is already registered
    #[error("No {0} handle available")]
    OutOfHandle(&'static str),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl SdkError {
    /// UPnP status code reported for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            SdkError::Core(e) => e.code(),
            SdkError::Discovery(e) => e.code(),
            SdkError::Soap(e) => e.code(),
            SdkError::CallbackServer(e) => e.code(),
            SdkError::Gena(e) => e.code(),
            SdkError::InvalidHandle(_) => ErrorCode::InvalidHandle,
            SdkError::OutOfHandle(_) => ErrorCode::OutOfHandle,
            SdkError::Runtime(_) => ErrorCode::Init,
        }
    }
}

pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(SdkError::InvalidHandle(7).code().code(), -100);
        assert_eq!(SdkError::OutOfHandle("client").code().code(), -102);
        assert_eq!(
            SdkError::from(GenaError::InvalidSid("uuid:x".to_string())).code(),
            ErrorCode::InvalidSid
        );
        assert_eq!(
            SdkError::from(CoreError::InvalidConfig("bad".to_string())).code(),
            ErrorCode::InvalidParam
        );
    }
}
