//! Error types for the uplink protocol layer.

use thiserror::Error;

/// Result type alias for uplink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the uplink client.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Protocol Errors =====
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Connection refused by the remote side: [{error_type}] {message}")]
    ConnectionRefused {
        error_type: ProtocolErrorType,
        message: String,
    },

    #[error("Message block too large: {size} bytes (limit: {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Unknown message type code: {0}")]
    UnknownMessageType(u8),

    // ===== Channel Errors =====
    #[error("No endpoint registered for channel {0}")]
    UnknownChannel(u64),

    #[error("Channel {0} is already registered")]
    ChannelAlreadyRegistered(u64),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timeout: operation timed out after {millis} ms")]
    Timeout { millis: u64 },
}

impl Error {
    /// Create a protocol error from any message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an internal error from any message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error indicates a broken underlying connection.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed(_))
    }

    /// Map this error to the protocol-level error classification used in
    /// goodbye messages and fatal-error callbacks.
    pub fn classify(&self) -> ProtocolErrorType {
        match self {
            Self::Io(_) | Self::ConnectionClosed(_) => ProtocolErrorType::LowLevelConnectionError,
            Self::Protocol(_)
            | Self::Handshake(_)
            | Self::MessageTooLarge { .. }
            | Self::UnknownMessageType(_) => ProtocolErrorType::InvalidHandshakeData,
            Self::ConnectionRefused { error_type, .. } => *error_type,
            _ => ProtocolErrorType::InternalClientError,
        }
    }
}

/// Protocol-level error classification, shared between both sides of the
/// connection. Each type has a stable numeric wire code; error goodbye
/// payloads carry their message wrapped as `"E<code>: <message>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorType {
    ProtocolVersionMismatch,
    InvalidHandshakeData,
    ClientNamespaceCollision,
    LowLevelConnectionError,
    InternalClientError,
    InternalServerError,
    Unknown,
}

impl ProtocolErrorType {
    /// The stable numeric code used on the wire.
    pub fn code(self) -> u32 {
        match self {
            Self::ProtocolVersionMismatch => 1,
            Self::InvalidHandshakeData => 2,
            Self::ClientNamespaceCollision => 3,
            Self::LowLevelConnectionError => 10,
            Self::InternalClientError => 20,
            Self::InternalServerError => 21,
            Self::Unknown => 99,
        }
    }

    /// Resolve a wire code back to its error type.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::ProtocolVersionMismatch,
            2 => Self::InvalidHandshakeData,
            3 => Self::ClientNamespaceCollision,
            10 => Self::LowLevelConnectionError,
            20 => Self::InternalClientError,
            21 => Self::InternalServerError,
            _ => Self::Unknown,
        }
    }

    /// Wrap a raw error message for transport in a goodbye payload.
    pub fn wrap_error_message(self, raw_message: &str) -> String {
        format!("E{}: {}", self.code(), raw_message)
    }

    /// Determine the error type of a wrapped goodbye payload.
    pub fn type_of_wrapped_message(wrapped: &str) -> Self {
        match Self::parse_wrapped(wrapped) {
            Some((code, _)) => Self::from_code(code),
            None => Self::Unknown,
        }
    }

    /// Strip the `"E<code>: "` prefix from a wrapped goodbye payload,
    /// returning the raw message. Unwrapped input is returned as-is.
    pub fn unwrap_error_message(wrapped: &str) -> String {
        match Self::parse_wrapped(wrapped) {
            Some((_, raw)) => raw.to_string(),
            None => wrapped.to_string(),
        }
    }

    fn parse_wrapped(wrapped: &str) -> Option<(u32, &str)> {
        let rest = wrapped.strip_prefix('E')?;
        let colon = rest.find(':')?;
        let code = rest[..colon].parse().ok()?;
        Some((code, rest[colon + 1..].trim_start()))
    }
}

impl std::fmt::Display for ProtocolErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::ProtocolVersionMismatch => "protocol version mismatch",
            Self::InvalidHandshakeData => "invalid handshake data",
            Self::ClientNamespaceCollision => "client namespace collision",
            Self::LowLevelConnectionError => "low-level connection error",
            Self::InternalClientError => "internal client error",
            Self::InternalServerError => "internal server error",
            Self::Unknown => "unknown error",
        };
        write!(f, "{}", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let refused = Error::ConnectionRefused {
            error_type: ProtocolErrorType::ProtocolVersionMismatch,
            message: "please update your client".to_string(),
        };
        assert_eq!(
            refused.to_string(),
            "Connection refused by the remote side: [protocol version mismatch] please update your client"
        );

        let oversize = Error::MessageTooLarge {
            size: 500_000,
            max: 262_144,
        };
        assert!(oversize.to_string().contains("500000 bytes"));

        let timeout = Error::Timeout { millis: 10_000 };
        assert_eq!(
            timeout.to_string(),
            "Timeout: operation timed out after 10000 ms"
        );
    }

    #[test]
    fn test_error_classify() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(io_err.classify(), ProtocolErrorType::LowLevelConnectionError);
        assert!(io_err.is_connection_level());

        assert_eq!(
            Error::protocol("bad frame").classify(),
            ProtocolErrorType::InvalidHandshakeData
        );
        assert_eq!(
            Error::internal("bug").classify(),
            ProtocolErrorType::InternalClientError
        );
    }

    #[test]
    fn test_error_type_codes_roundtrip() {
        for error_type in [
            ProtocolErrorType::ProtocolVersionMismatch,
            ProtocolErrorType::InvalidHandshakeData,
            ProtocolErrorType::ClientNamespaceCollision,
            ProtocolErrorType::LowLevelConnectionError,
            ProtocolErrorType::InternalClientError,
            ProtocolErrorType::InternalServerError,
        ] {
            assert_eq!(ProtocolErrorType::from_code(error_type.code()), error_type);
        }
        assert_eq!(
            ProtocolErrorType::from_code(12345),
            ProtocolErrorType::Unknown
        );
    }

    #[test]
    fn test_wrap_and_unwrap_error_message() {
        let wrapped =
            ProtocolErrorType::ProtocolVersionMismatch.wrap_error_message("version 0.9 rejected");
        assert_eq!(wrapped, "E1: version 0.9 rejected");
        assert_eq!(
            ProtocolErrorType::type_of_wrapped_message(&wrapped),
            ProtocolErrorType::ProtocolVersionMismatch
        );
        assert_eq!(
            ProtocolErrorType::unwrap_error_message(&wrapped),
            "version 0.9 rejected"
        );
    }

    #[test]
    fn test_unwrap_error_message_passthrough() {
        // payloads without a recognizable code prefix are returned unchanged
        assert_eq!(
            ProtocolErrorType::unwrap_error_message("plain text"),
            "plain text"
        );
        assert_eq!(
            ProtocolErrorType::type_of_wrapped_message("plain text"),
            ProtocolErrorType::Unknown
        );
    }
}
