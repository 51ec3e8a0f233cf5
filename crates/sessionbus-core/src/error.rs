//! Shared error type across sessionbus crates.

use thiserror::Error;

/// Stable error codes used in logs and client-visible error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid input / malformed message.
    BadRequest,
    /// Event carried a session id other than the hub's.
    SessionMismatch,
    /// A local listener failed.
    ListenerFailed,
    /// A transport could not deliver.
    SendFailed,
    /// Transport is not connected and will not queue.
    NotConnected,
    /// Connection-level failure.
    ConnectionFailed,
    /// RPC call timed out.
    Timeout,
    /// Remote side answered with a failure response.
    Remote,
    /// Component was shut down while work was pending.
    Shutdown,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in JSON error frames and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::SessionMismatch => "SESSION_MISMATCH",
            ErrorCode::ListenerFailed => "LISTENER_FAILED",
            ErrorCode::SendFailed => "SEND_FAILED",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Remote => "REMOTE",
            ErrorCode::Shutdown => "SHUTDOWN",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, SessionBusError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum SessionBusError {
    #[error("session mismatch: expected {expected}, got {actual}")]
    SessionMismatch { expected: String, actual: String },
    #[error("listener failed: {0}")]
    Listener(String),
    #[error("transport {transport} send failed: {reason}")]
    TransportSend { transport: String, reason: String },
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request {request_type} timed out after {timeout_ms}ms")]
    RpcTimeout { request_type: String, timeout_ms: u64 },
    #[error("request could not be sent: {0}")]
    RpcSendFailed(String),
    #[error("{0}")]
    RpcRemote(String),
    #[error("rpc manager shut down")]
    Shutdown,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl SessionBusError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionBusError::SessionMismatch { .. } => ErrorCode::SessionMismatch,
            SessionBusError::Listener(_) => ErrorCode::ListenerFailed,
            SessionBusError::TransportSend { .. } => ErrorCode::SendFailed,
            SessionBusError::NotConnected(_) => ErrorCode::NotConnected,
            SessionBusError::Connection(_) => ErrorCode::ConnectionFailed,
            SessionBusError::RpcTimeout { .. } => ErrorCode::Timeout,
            SessionBusError::RpcSendFailed(_) => ErrorCode::SendFailed,
            SessionBusError::RpcRemote(_) => ErrorCode::Remote,
            SessionBusError::Shutdown => ErrorCode::Shutdown,
            SessionBusError::BadRequest(_) => ErrorCode::BadRequest,
            SessionBusError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for the timeout rejection kind of an RPC call.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionBusError::RpcTimeout { .. })
    }
}

impl From<serde_json::Error> for SessionBusError {
    fn from(e: serde_json::Error) -> Self {
        SessionBusError::BadRequest(format!("json: {e}"))
    }
}
