use std::fmt;
use std::io;

use thiserror::Error;

use crate::topology::NodeAddress;

/// A server error reply that was not handled by the retry state machine:
/// its kind token (`WRONGTYPE`, `NOAUTH`, ...) and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The leading all-caps token of the error message, if any.
    pub kind: String,
    /// The remainder of the error message.
    pub message: String,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} {}", self.kind, self.message)
        }
    }
}

/// Errors produced by the client's public operations.
///
/// Every variant carries enough context to act on it: a `RedirectionError`
/// carries the last node it was pointed at, a `Timeout` carries the
/// underlying cause.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dial, TLS, handshake, or transport failure. Retried per policy before
    /// surfacing.
    #[error("connection error: {0}")]
    ConnectionError(#[source] io::Error),

    /// The caller's deadline elapsed before a result was available.
    #[error("request timed out after {0:?}{}", last_cause.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Timeout {
        /// How long the caller allowed before giving up.
        elapsed: std::time::Duration,
        /// The most recent failure the engine was retrying past, if any.
        last_cause: Option<Box<ClientError>>,
    },

    /// A server-side error reply not covered by the retry table.
    #[error("server error: {0}")]
    RequestError(ServerError),

    /// Retry budget exhausted while the server kept redirecting the
    /// request; carries the last node the engine was pointed at.
    #[error("redirection retry budget exhausted, last target was {0}")]
    RedirectionError(NodeAddress),

    /// A multi-key command or atomic batch's keys do not share a single
    /// hash slot.
    #[error("keys span multiple hash slots: {0} and {1}")]
    CrossSlot(u16, u16),

    /// The operation was submitted after `close()` completed.
    #[error("client is closed")]
    ClientClosed,

    /// An illegal option combination (e.g. a retry strategy on an atomic
    /// batch, or a routing hint that disagrees with a batch's slot).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `execute_batch` was called with a batch that has no commands.
    #[error("batch has no commands")]
    EmptyBatch,

    /// The operation was aborted because the client began shutting down
    /// while it was in flight.
    #[error("operation aborted by client shutdown")]
    ClosingError,

    /// A routing hint named an address that is not part of the current
    /// topology.
    #[error("unknown node: {0}")]
    UnknownNode(NodeAddress),

    /// No node in the current NodeClient table was Ready within the
    /// caller's deadline.
    #[error("no node available to serve the request")]
    NodeUnavailable,

    /// A reply could not be decoded or did not match the shape a command
    /// wrapper expected.
    #[error("protocol error: {0}")]
    Protocol(#[from] valkey_protocol::DecodeError),
}

impl ClientError {
    /// Builds a [`ClientError::RequestError`] from a decoded `Value::Error`
    /// pair.
    pub fn request_error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::RequestError(ServerError { kind: kind.into(), message: message.into() })
    }
}

/// Convenient, uniform access to the error information buried inside a
/// possibly-wrapped [`ClientError`].
///
/// Lets higher layers (a retrying wrapper, a connection pool) inspect
/// *what kind* of failure occurred without matching on every variant
/// themselves.
pub trait RpcError: std::error::Error + fmt::Debug + Send + Sync {
    /// The underlying server error reply, if this error originated from one.
    fn as_error_response(&self) -> Option<&ServerError>;

    /// `true` if [`RpcError::as_error_response`] would return `Some`.
    fn is_error_response(&self) -> bool {
        self.as_error_response().is_some()
    }

    /// The underlying I/O error, if this error originated from the
    /// transport.
    fn as_io_error(&self) -> Option<&io::Error>;

    /// `true` if [`RpcError::as_io_error`] would return `Some`.
    fn is_io_error(&self) -> bool {
        self.as_io_error().is_some()
    }
}

impl RpcError for ClientError {
    fn as_error_response(&self) -> Option<&ServerError> {
        match self {
            ClientError::RequestError(e) => Some(e),
            _ => None,
        }
    }

    fn as_io_error(&self) -> Option<&io::Error> {
        match self {
            ClientError::ConnectionError(e) => Some(e),
            _ => None,
        }
    }
}

/// A `Result` type aliased to [`ClientError`], used throughout the crate's
/// public surface.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_round_trips_kind_and_message() {
        let err = ClientError::request_error("WRONGTYPE", "Operation against a key");
        assert!(err.is_error_response());
        assert_eq!(err.as_error_response().unwrap().kind, "WRONGTYPE");
        assert!(!err.is_io_error());
    }

    #[test]
    fn connection_error_exposes_io_error() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = ClientError::ConnectionError(io_err);
        assert!(err.is_io_error());
        assert!(!err.is_error_response());
    }
}
