//! UPnP status codes and the core crate's error type.

use std::fmt;

/// Broad grouping of failures, used to tell "peer unreachable" apart from
/// "peer sent garbage" and from application-level action faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Socket, connect, bind and timeout failures
    Transport,
    /// Malformed SSDP, HTTP, GENA or SOAP content
    Protocol,
    /// SOAP fault returned by the remote service
    Action,
    /// Exhausted handles, sockets, jobs or memory
    Resource,
    /// Misuse of the API (bad handle, bad argument, wrong state)
    Api,
}

/// UPnP API status codes as reported to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -100,
    InvalidParam = -101,
    OutOfHandle = -102,
    OutOfMemory = -104,
    Init = -105,
    InvalidUrl = -108,
    InvalidSid = -109,
    InvalidDevice = -110,
    InvalidService = -111,
    BadResponse = -113,
    BadRequest = -114,
    InvalidAction = -115,
    Finish = -116,
    BadHttpMsg = -119,
    AlreadyRegistered = -120,
    NetworkError = -200,
    SocketWrite = -201,
    SocketRead = -202,
    SocketBind = -203,
    SocketConnect = -204,
    OutOfSocket = -205,
    TimedOut = -207,
    SocketError = -208,
    Canceled = -210,
    EventProtocol = -300,
    SubscribeUnaccepted = -301,
    UnsubscribeUnaccepted = -302,
    NotifyUnaccepted = -303,
    InvalidArgument = -501,
    NotFound = -507,
    InternalError = -911,
}

impl ErrorCode {
    const ALL: [ErrorCode; 32] = [
        Self::Success,
        Self::InvalidHandle,
        Self::InvalidParam,
        Self::OutOfHandle,
        Self::OutOfMemory,
        Self::Init,
        Self::InvalidUrl,
        Self::InvalidSid,
        Self::InvalidDevice,
        Self::InvalidService,
        Self::BadResponse,
        Self::BadRequest,
        Self::InvalidAction,
        Self::Finish,
        Self::BadHttpMsg,
        Self::AlreadyRegistered,
        Self::NetworkError,
        Self::SocketWrite,
        Self::SocketRead,
        Self::SocketBind,
        Self::SocketConnect,
        Self::OutOfSocket,
        Self::TimedOut,
        Self::SocketError,
        Self::Canceled,
        Self::EventProtocol,
        Self::SubscribeUnaccepted,
        Self::UnsubscribeUnaccepted,
        Self::NotifyUnaccepted,
        Self::InvalidArgument,
        Self::NotFound,
        Self::InternalError,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            NetworkError | SocketWrite | SocketRead | SocketBind | SocketConnect | TimedOut
            | SocketError | Canceled => ErrorCategory::Transport,
            BadResponse | BadRequest | BadHttpMsg | EventProtocol | SubscribeUnaccepted
            | UnsubscribeUnaccepted | NotifyUnaccepted => ErrorCategory::Protocol,
            InvalidAction => ErrorCategory::Action,
            OutOfHandle | OutOfMemory | OutOfSocket => ErrorCategory::Resource,
            Success | InvalidHandle | InvalidParam | Init | InvalidUrl | InvalidSid
            | InvalidDevice | InvalidService | Finish | AlreadyRegistered | InvalidArgument
            | NotFound | InternalError => ErrorCategory::Api,
        }
    }

    /// Symbolic name as it appears in UPnP SDK documentation.
    pub fn name(self) -> &'static str {
        use ErrorCode::*;
        match self {
            Success => "UPNP_E_SUCCESS",
            InvalidHandle => "UPNP_E_INVALID_HANDLE",
            InvalidParam => "UPNP_E_INVALID_PARAM",
            OutOfHandle => "UPNP_E_OUTOF_HANDLE",
            OutOfMemory => "UPNP_E_OUTOF_MEMORY",
            Init => "UPNP_E_INIT",
            InvalidUrl => "UPNP_E_INVALID_URL",
            InvalidSid => "UPNP_E_INVALID_SID",
            InvalidDevice => "UPNP_E_INVALID_DEVICE",
            InvalidService => "UPNP_E_INVALID_SERVICE",
            BadResponse => "UPNP_E_BAD_RESPONSE",
            BadRequest => "UPNP_E_BAD_REQUEST",
            InvalidAction => "UPNP_E_INVALID_ACTION",
            Finish => "UPNP_E_FINISH",
            BadHttpMsg => "UPNP_E_BAD_HTTPMSG",
            AlreadyRegistered => "UPNP_E_ALREADY_REGISTERED",
            NetworkError => "UPNP_E_NETWORK_ERROR",
            SocketWrite => "UPNP_E_SOCKET_WRITE",
            SocketRead => "UPNP_E_SOCKET_READ",
            SocketBind => "UPNP_E_SOCKET_BIND",
            SocketConnect => "UPNP_E_SOCKET_CONNECT",
            OutOfSocket => "UPNP_E_OUTOF_SOCKET",
            TimedOut => "UPNP_E_TIMEDOUT",
            SocketError => "UPNP_E_SOCKET_ERROR",
            Canceled => "UPNP_E_CANCELED",
            EventProtocol => "UPNP_E_EVENT_PROTOCOL",
            SubscribeUnaccepted => "UPNP_E_SUBSCRIBE_UNACCEPTED",
            UnsubscribeUnaccepted => "UPNP_E_UNSUBSCRIBE_UNACCEPTED",
            NotifyUnaccepted => "UPNP_E_NOTIFY_UNACCEPTED",
            InvalidArgument => "UPNP_E_INVALID_ARGUMENT",
            NotFound => "UPNP_E_NOT_FOUND",
            InternalError => "UPNP_E_INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = i32;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.code() == value)
            .ok_or(value)
    }
}

/// Errors raised by the shared primitives in this crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The timer has been shut down and accepts no more jobs
    #[error("Timer thread is shut down")]
    TimerShutdown,

    /// No tokio runtime was available to drive timers
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::InvalidConfig(_) | CoreError::Json(_) => ErrorCode::InvalidParam,
            CoreError::TimerShutdown | CoreError::NoRuntime(_) => ErrorCode::Init,
            CoreError::Io(_) => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorCode::SocketConnect, ErrorCategory::Transport)]
    #[case(ErrorCode::TimedOut, ErrorCategory::Transport)]
    #[case(ErrorCode::BadResponse, ErrorCategory::Protocol)]
    #[case(ErrorCode::InvalidAction, ErrorCategory::Action)]
    #[case(ErrorCode::OutOfMemory, ErrorCategory::Resource)]
    #[case(ErrorCode::InvalidHandle, ErrorCategory::Api)]
    fn test_category(#[case] code: ErrorCode, #[case] category: ErrorCategory) {
        assert_eq!(code.category(), category);
    }

    #[test]
    fn test_try_from_round_trips_all_codes() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
        assert_eq!(ErrorCode::try_from(-12345), Err(-12345));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ErrorCode::InvalidHandle.to_string(),
            "UPNP_E_INVALID_HANDLE (-100)"
        );
        let err = CoreError::TimerShutdown;
        assert_eq!(err.to_string(), "Timer thread is shut down");
        assert_eq!(err.code(), ErrorCode::Init);
    }
}
