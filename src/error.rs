use std::sync::Arc;
use thiserror::Error;

/// Result type for webOS operations
pub type Result<T> = std::result::Result<T, WebOsError>;

/// Device error text that marks an unsupported service or method
pub(crate) const SERVICE_NOT_FOUND: &str = "404 no such service or method";

/// Errors that can occur when talking to a webOS TV
///
/// The enum is `Clone` so a single connect outcome can be handed to every
/// caller waiting on the same connection attempt.
#[derive(Error, Debug, Clone)]
pub enum WebOsError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(Arc<tokio_tungstenite::tungstenite::Error>),

    /// Opening the transport took longer than the configured timeout
    #[error("Connect timeout")]
    ConnectTimeout,

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Keepalive probe was not acknowledged in time
    #[error("Keepalive timeout")]
    KeepaliveTimeout,

    /// No connection is active
    #[error("Not connected")]
    NotConnected,

    /// Handshake did not yield a client key
    #[error("Pairing failed: {0}")]
    Pairing(String),

    /// The TV rejected a request
    #[error("Device error: {code}")]
    Device {
        /// Machine string from the error frame
        code: String,
    },

    /// The TV does not know the requested service or method
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Response violated the protocol contract
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Response carried an explicit failure flag
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Waiter was still pending when the connection was torn down
    #[error("Cancelled")]
    Cancelled,

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Credential storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Caller supplied an invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configured state channel name is not known
    #[error("Unknown state channel: {0}")]
    UnknownChannel(String),
}

impl WebOsError {
    /// Whether this error is fatal to the connection
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            WebOsError::WebSocket(_)
                | WebOsError::ConnectTimeout
                | WebOsError::ConnectionClosed
                | WebOsError::KeepaliveTimeout
                | WebOsError::Io(_)
        )
    }

    /// Whether this error means the TV does not support the operation
    ///
    /// Subscription bootstrap tolerates these.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            WebOsError::ServiceNotFound(_)
                | WebOsError::Device { .. }
                | WebOsError::RequestFailed(_)
        )
    }

    /// Build the error for an `error` frame
    pub(crate) fn from_device(code: impl Into<String>) -> Self {
        let code = code.into();
        if code == SERVICE_NOT_FOUND {
            WebOsError::ServiceNotFound(code)
        } else {
            WebOsError::Device { code }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WebOsError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        WebOsError::WebSocket(Arc::new(e))
    }
}

impl From<serde_json::Error> for WebOsError {
    fn from(e: serde_json::Error) -> Self {
        WebOsError::Json(Arc::new(e))
    }
}

impl From<std::io::Error> for WebOsError {
    fn from(e: std::io::Error) -> Self {
        WebOsError::Io(Arc::new(e))
    }
}
