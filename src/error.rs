//! Error types for the WebSocket protocol implementation.
//!
//! Three failure families matter to callers: stream errors (a frame could not
//! be read off the wire), handshake errors (the connection never opened) and
//! protocol violations (the peer broke RFC 6455 after the connection opened).

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The byte stream ended or produced bytes that do not form a frame.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Invalid UTF-8 in text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Malformed or unacceptable opening handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The server answered the upgrade request with an error status.
    #[error("The server did not accept the upgrade request (status: {status})")]
    HandshakeRejected {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// The server kept redirecting past the configured limit.
    #[error("Too many redirects: {count} (max: {max})")]
    TooManyRedirects {
        /// Number of redirects followed.
        count: usize,
        /// Maximum allowed redirects.
        max: usize,
    },

    /// Handshake data exceeds configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual handshake size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The URI is not a usable `ws://` or `wss://` URI.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// TLS setup or negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Returns `true` if the error means the connection never reached the
    /// open state.
    #[must_use]
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Error::InvalidHandshake(_)
                | Error::HandshakeRejected { .. }
                | Error::TooManyRedirects { .. }
                | Error::HandshakeTooLarge { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Stream(err.to_string())
        } else {
            Error::Io(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUri(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000_000,
            max: 16_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 20000000 bytes (max: 16000000)"
        );
        assert_eq!(
            Error::HandshakeRejected { status: 403 }.to_string(),
            "The server did not accept the upgrade request (status: 403)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
    }

    #[test]
    fn test_unexpected_eof_is_stream_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "early eof");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Stream(_)));
    }

    #[test]
    fn test_handshake_classification() {
        assert!(Error::HandshakeRejected { status: 500 }.is_handshake());
        assert!(Error::TooManyRedirects { count: 6, max: 5 }.is_handshake());
        assert!(!Error::Stream("invalid byte".into()).is_handshake());
    }
}
