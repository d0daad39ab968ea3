//! Error types
//!
//! A producer session can fail in two places: while authenticating its
//! preamble, and while decoding the multipart stream that follows. Both are
//! session-fatal but never process-fatal. Only listener bind failures at
//! startup escape as process-level errors.

use std::fmt;
use std::io;

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or file I/O failure
    Io(io::Error),
    /// Producer failed the authentication phase
    Auth(AuthError),
    /// Producer stream could not be decoded
    Protocol(ProtocolError),
    /// Listener could not be bound
    Bind {
        /// Address that was requested
        addr: std::net::SocketAddr,
        /// Underlying cause
        source: io::Error,
    },
    /// An external collaborator process could not be started
    Collaborator {
        /// Collaborator name ("recorder", "restreamer")
        name: &'static str,
        /// Underlying cause
        source: io::Error,
    },
    /// Invalid configuration value
    Config(String),
}

/// Authentication (preamble) failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Preamble bytes did not match the configured token
    Mismatch,
    /// Preamble did not arrive within the deadline
    Timeout,
    /// Connection closed before the full preamble was read
    ShortRead {
        /// Bytes received before EOF
        received: usize,
    },
}

/// Multipart framing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// No boundary line found within the allowed preamble
    MissingBoundary,
    /// Bytes after a part body were not a boundary delimiter
    MalformedBoundary,
    /// Header line without a `name: value` shape
    MalformedHeader(String),
    /// Content-Length header that is not a decimal number
    InvalidContentLength(String),
    /// Part header block exceeded the size limit
    HeaderTooLarge(usize),
    /// Part body exceeded the size limit
    FrameTooLarge(usize),
    /// Connection ended in the middle of a part
    Truncated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Auth(e) => write!(f, "Authentication failed: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            Error::Collaborator { name, source } => {
                write!(f, "Failed to start {}: {}", name, source)
            }
            Error::Config(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Mismatch => write!(f, "preamble does not match token"),
            AuthError::Timeout => write!(f, "preamble not received in time"),
            AuthError::ShortRead { received } => {
                write!(f, "connection closed after {} preamble bytes", received)
            }
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MissingBoundary => write!(f, "no multipart boundary found"),
            ProtocolError::MalformedBoundary => write!(f, "malformed multipart boundary"),
            ProtocolError::MalformedHeader(line) => write!(f, "malformed part header: {:?}", line),
            ProtocolError::InvalidContentLength(value) => {
                write!(f, "invalid Content-Length: {:?}", value)
            }
            ProtocolError::HeaderTooLarge(size) => {
                write!(f, "part headers exceed {} bytes", size)
            }
            ProtocolError::FrameTooLarge(size) => write!(f, "part body exceeds {} bytes", size),
            ProtocolError::Truncated => write!(f, "stream ended inside a part"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Auth(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Bind { source, .. } => Some(source),
            Error::Collaborator { source, .. } => Some(source),
            Error::Config(_) => None,
        }
    }
}

impl std::error::Error for AuthError {}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested() {
        let err: Error = ProtocolError::FrameTooLarge(1024).into();
        assert_eq!(err.to_string(), "Protocol error: part body exceeds 1024 bytes");

        let err: Error = AuthError::ShortRead { received: 7 }.into();
        assert_eq!(
            err.to_string(),
            "Authentication failed: connection closed after 7 preamble bytes"
        );
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err: Error = AuthError::Timeout.into();
        assert!(err.source().is_some());
        assert!(Error::Config("x".into()).source().is_none());
    }
}
