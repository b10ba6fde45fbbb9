//! Client error types.

use gridlink_protocol::{status, ProtocolError};
use thiserror::Error;

/// Client errors. Remote failures are not errors: a negative reply status
/// is returned as the call's ordinary result.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("unknown endpoint {0}")]
    UnknownEndpoint(u32),

    #[error("endpoint {0} declares an input schema but no input was supplied")]
    MissingInput(u32),

    #[error("unexpected reply message type {0:?}")]
    UnexpectedReply(String),
}

impl ClientError {
    /// Whether the one-shot reconnect-and-retry policy applies. Framing
    /// corruption and schema failures are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::Protocol(_) => false,
            _ => false,
        }
    }

    /// Stable status code for error-stack diagnostics.
    pub fn code(&self) -> i32 {
        match self {
            ClientError::Io(_) | ClientError::ConnectionClosed | ClientError::NotConnected => {
                status::TRANSPORT_ERR
            }
            ClientError::Timeout => status::READ_TIMEOUT_ERR,
            ClientError::Protocol(e) => e.code(),
            ClientError::UnknownEndpoint(_) => status::UNKNOWN_ENDPOINT_ERR,
            ClientError::MissingInput(_) | ClientError::UnexpectedReply(_) => {
                status::CALL_INPUT_ERR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(
            ClientError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "x"))
                .is_retryable()
        );
        assert!(!ClientError::UnknownEndpoint(9).is_retryable());
        assert!(!ClientError::Protocol(ProtocolError::HeaderLength(0)).is_retryable());
        assert!(
            !ClientError::Protocol(ProtocolError::Format("bad".into())).is_retryable()
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(ClientError::Timeout.code(), status::READ_TIMEOUT_ERR);
        assert_eq!(
            ClientError::UnknownEndpoint(1).code(),
            status::UNKNOWN_ENDPOINT_ERR
        );
    }
}
