use bytes::Bytes;

/// A decoded RESP2/RESP3 reply.
///
/// RESP2 connections only ever produce the subset `Nil`, `Status`, `Error`,
/// `Int`, `BulkString`, `Array` (nested `Map`/`Set`/`Push` replies arrive as
/// plain `Array`s instead). RESP3 connections may produce the full set.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `$-1\r\n` / `_\r\n` — absence of a value.
    Nil,
    /// `+OK\r\n` — a simple status string. Never contains `\r` or `\n`.
    Status(String),
    /// `-ERR message\r\n` — a server error reply, split into its leading
    /// error-kind token (`ERR`, `WRONGTYPE`, `MOVED`, ...) and the remainder.
    Error(String, String),
    /// `:123\r\n` — a signed 64-bit integer.
    Int(i64),
    /// `,3.14\r\n` (RESP3) — a double-precision float. `+inf`/`-inf`/`nan`
    /// round-trip exactly.
    Double(f64),
    /// `#t\r\n` / `#f\r\n` (RESP3).
    Bool(bool),
    /// `$6\r\nfoobar\r\n` — an opaque byte string.
    BulkString(Bytes),
    /// `*3\r\n...` — an ordered sequence of replies.
    Array(Vec<Value>),
    /// `%2\r\n...` (RESP3) — a key/value sequence; encoded as an `Array` of
    /// pairs on RESP2 connections.
    Map(Vec<(Value, Value)>),
    /// `~3\r\n...` (RESP3) — an unordered collection with no duplicates;
    /// encoded as an `Array` on RESP2 connections.
    Set(Vec<Value>),
    /// `>3\r\n...` (RESP3) — an out-of-band push frame, e.g. a pub/sub
    /// message or invalidation notice. `kind` is the first array element
    /// (`"message"`, `"pmessage"`, ...); the remaining elements follow.
    Push(String, Vec<Value>),
    /// `=15\r\ntxt:Some string\r\n` (RESP3) — a bulk string tagged with a
    /// three-byte format marker (`txt`, `mkd`, ...).
    VerbatimString(String, Bytes),
    /// `(3492890328409238509324850943850943825024385\r\n` (RESP3) — an
    /// arbitrary-precision integer, kept as its decimal text form.
    BigNumber(String),
}

impl Value {
    /// Convenience constructor for `BulkString` from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::BulkString(data.into())
    }

    /// `true` if this reply is a `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns the error kind/message pair if this reply is an `Error`.
    pub fn as_error(&self) -> Option<(&str, &str)> {
        match self {
            Value::Error(kind, msg) => Some((kind.as_str(), msg.as_str())),
            _ => None,
        }
    }

    /// Returns the elements of an `Array`/`Set`/`Push` reply, or `None`.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Set(items) => Some(items),
            Value::Push(_, items) => Some(items),
            _ => None,
        }
    }

    /// Returns the raw bytes of a `BulkString`/`VerbatimString`, or `None`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::BulkString(b) | Value::VerbatimString(_, b) => Some(b),
            Value::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

/// Splits a RESP error message into its leading all-caps kind token (if
/// any) and the remainder, e.g. `"MOVED 1234 10.0.0.1:6381"` becomes
/// `("MOVED", "1234 10.0.0.1:6381")`.
pub fn split_error_kind(message: &str) -> (String, String) {
    let mut parts = message.splitn(2, ' ');
    let first = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();
    if !first.is_empty() && first.chars().all(|c| c.is_ascii_uppercase()) {
        (first.to_string(), rest.to_string())
    } else {
        (String::new(), message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_known_error_kind() {
        assert_eq!(
            split_error_kind("MOVED 1234 10.0.0.1:6381"),
            ("MOVED".to_string(), "1234 10.0.0.1:6381".to_string())
        );
        assert_eq!(
            split_error_kind("WRONGTYPE Operation against a key"),
            ("WRONGTYPE".to_string(), "Operation against a key".to_string())
        );
    }

    #[test]
    fn falls_back_when_no_kind_token_present() {
        assert_eq!(
            split_error_kind("some lowercase message"),
            (String::new(), "some lowercase message".to_string())
        );
    }
}
