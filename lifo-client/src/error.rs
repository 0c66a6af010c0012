use std::fmt;

/// Errors that can occur during client operations
#[derive(Debug)]
pub enum ClientError {
    /// Failed to establish a connection to the server
    ConnectionFailed(std::io::Error),
    /// Server closed the connection without answering
    ConnectionClosed,
    /// I/O error during communication
    IoError(std::io::Error),
    /// Received an unexpected or invalid response from the server
    InvalidResponse(String),
    /// Server refused the connection (`0xFF`)
    Rejected,
    /// Operation timed out
    Timeout,
    /// Payload longer than the protocol's 127 byte limit
    PayloadTooLarge(usize),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            Self::ConnectionClosed => write!(f, "Connection closed by server"),
            Self::IoError(e) => write!(f, "I/O error: {}", e),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::Rejected => write!(f, "Connection rejected by server (at capacity)"),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::PayloadTooLarge(len) => {
                write!(f, "Payload of {} bytes exceeds the 127 byte limit", len)
            },
        }
    }
}

impl ClientError {
    /// Returns true if the request was not served and may be sent again on a
    /// new connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Server at capacity or the connection was evicted/halted
            Self::Rejected | Self::ConnectionClosed => true,
            Self::ConnectionFailed(_) | Self::Timeout => true,
            Self::IoError(_) | Self::InvalidResponse(_) | Self::PayloadTooLarge(_) => false,
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectionFailed(e) | Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Self::ConnectionClosed;
        }
        Self::IoError(err)
    }
}

impl From<lifo_core::LifoError> for ClientError {
    fn from(err: lifo_core::LifoError) -> Self {
        match err {
            lifo_core::LifoError::PayloadTooLarge(len) => Self::PayloadTooLarge(len),
            lifo_core::LifoError::Io(e) => Self::from(e),
            other => Self::InvalidResponse(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
