use thiserror::Error;

/// Errors produced while decoding a RESP frame from a byte stream.
///
/// `Incomplete` is not a failure: it signals that the decoder needs more
/// bytes before it can emit a value and the caller should read again.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not enough bytes buffered yet to complete the current frame.
    #[error("incomplete frame")]
    Incomplete,

    /// The bytes buffered so far cannot be a valid RESP frame. Fatal for the
    /// connection that produced them.
    #[error("malformed RESP frame: {0}")]
    Malformed(String),

    /// A bulk string or aggregate declared a length beyond the configured
    /// buffer cap.
    #[error("frame size {size} exceeds configured limit {limit}")]
    TooLarge {
        /// Declared size of the offending frame, in bytes.
        size: i64,
        /// The configured ceiling that was exceeded.
        limit: usize,
    },
}

/// Errors raised while building a [`crate::Command`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A command must carry at least a verb.
    #[error("command has no arguments")]
    Empty,
}
