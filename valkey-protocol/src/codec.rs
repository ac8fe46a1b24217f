//! A resumable RESP2/RESP3 frame codec.
//!
//! [`RespCodec`] implements [`tokio_util::codec::Decoder`] and
//! [`tokio_util::codec::Encoder`] so a Connection can drive it through
//! `tokio_util::codec::Framed` around an `AsyncRead + AsyncWrite` stream.
//!
//! Decoding never mutates anything until a complete top-level frame is
//! available: `decode` re-examines the buffered bytes from the start on
//! every call and returns `Ok(None)` the moment it would otherwise read
//! past the end of what has arrived, leaving the buffer untouched for the
//! next read. This keeps the decoder correct under arbitrarily fine-grained
//! partial reads without needing to persist a parse stack across calls.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::error::DecodeError;
use crate::value::{split_error_kind, Value};

/// Default ceiling on a single bulk string / aggregate declared length.
pub const DEFAULT_MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// RESP2/RESP3 codec over a byte stream.
///
/// Construct with [`RespCodec::new`] (RESP3-capable) or
/// [`RespCodec::with_max_frame_len`] to override the memory-exhaustion
/// guard on declared bulk string / aggregate lengths.
#[derive(Debug, Clone)]
pub struct RespCodec {
    max_frame_len: usize,
}

impl Default for RespCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RespCodec {
    /// A codec with the default 512 MiB frame-size ceiling.
    pub fn new() -> Self {
        RespCodec { max_frame_len: DEFAULT_MAX_FRAME_LEN }
    }

    /// A codec that rejects any declared bulk/aggregate length over `max`.
    pub fn with_max_frame_len(max: usize) -> Self {
        RespCodec { max_frame_len: max }
    }
}

impl Decoder for RespCodec {
    type Item = Value;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, DecodeError> {
        match parse_value(src, self.max_frame_len)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<&Command> for RespCodec {
    type Error = DecodeError;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), DecodeError> {
        encode_argv(item.argv(), dst);
        Ok(())
    }
}

/// Parses exactly one complete frame out of `buf`, treating a partial
/// frame as an error rather than a request for more bytes.
///
/// Useful outside a `Framed` pipeline — e.g. replaying a single canned
/// reply in a test double that has no stream to read from.
pub fn parse_complete(buf: &[u8]) -> Result<Value, DecodeError> {
    match parse_value(buf, DEFAULT_MAX_FRAME_LEN)? {
        Some((value, _consumed)) => Ok(value),
        None => Err(DecodeError::Incomplete),
    }
}

/// Encodes `argv` as a RESP array of bulk strings — the uniform wire form
/// every outbound command uses, inline commands included.
pub fn encode_argv(argv: &[Bytes], dst: &mut BytesMut) {
    dst.extend_from_slice(format!("*{}\r\n", argv.len()).as_bytes());
    for arg in argv {
        dst.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        dst.extend_from_slice(arg);
        dst.extend_from_slice(b"\r\n");
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].windows(2).position(|w| w == b"\r\n").map(|p| from + p)
}

/// Reads one CRLF-terminated line starting at `pos`. Returns the line
/// (excluding the CRLF) and the position just past the CRLF.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let end = find_crlf(buf, pos)?;
    Some((&buf[pos..end], end + 2))
}

fn parse_i64(bytes: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError::Malformed(format!("not a valid integer: {:?}", bytes)))
}

fn parse_f64(bytes: &[u8]) -> Result<f64, DecodeError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|_| DecodeError::Malformed("double is not valid UTF-8".into()))?;
    match s {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => s
            .parse::<f64>()
            .map_err(|_| DecodeError::Malformed(format!("not a valid double: {s:?}"))),
    }
}

fn check_len(len: i64, max_frame_len: usize) -> Result<(), DecodeError> {
    if len >= 0 && len as u64 > max_frame_len as u64 {
        return Err(DecodeError::TooLarge { size: len, limit: max_frame_len });
    }
    Ok(())
}

/// Parses one RESP value starting at the beginning of `buf`.
///
/// Returns `Ok(Some((value, consumed)))` on a complete frame, `Ok(None)` if
/// more bytes are needed, or `Err` if the bytes can never form a valid
/// frame.
fn parse_value(buf: &[u8], max_frame_len: usize) -> Result<Option<(Value, usize)>, DecodeError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let tag = buf[0];
    let Some((line, after_line)) = read_line(buf, 1) else {
        return Ok(None);
    };

    match tag {
        b'+' => {
            let s = String::from_utf8_lossy(line).into_owned();
            Ok(Some((Value::Status(s), after_line)))
        }
        b'-' => {
            let msg = String::from_utf8_lossy(line).into_owned();
            let (kind, rest) = split_error_kind(&msg);
            Ok(Some((Value::Error(kind, rest), after_line)))
        }
        b':' => {
            let n = parse_i64(line)?;
            Ok(Some((Value::Int(n), after_line)))
        }
        b',' => {
            let d = parse_f64(line)?;
            Ok(Some((Value::Double(d), after_line)))
        }
        b'#' => match line {
            b"t" => Ok(Some((Value::Bool(true), after_line))),
            b"f" => Ok(Some((Value::Bool(false), after_line))),
            _ => Err(DecodeError::Malformed(format!("invalid boolean frame: {:?}", line))),
        },
        b'_' => Ok(Some((Value::Nil, after_line))),
        b'(' => {
            let s = String::from_utf8_lossy(line).into_owned();
            Ok(Some((Value::BigNumber(s), after_line)))
        }
        b'$' | b'=' | b'!' => parse_bulk(tag, line, after_line, buf, max_frame_len),
        b'*' | b'%' | b'~' | b'>' => parse_aggregate(tag, line, after_line, buf, max_frame_len),
        other => Err(DecodeError::Malformed(format!("unknown type byte: {:?}", other as char))),
    }
}

fn parse_bulk(
    tag: u8,
    len_line: &[u8],
    after_line: usize,
    buf: &[u8],
    max_frame_len: usize,
) -> Result<Option<(Value, usize)>, DecodeError> {
    let len = parse_i64(len_line)?;
    if len < 0 {
        // `$-1\r\n` is the RESP2 nil bulk string.
        return Ok(Some((Value::Nil, after_line)));
    }
    check_len(len, max_frame_len)?;
    let len = len as usize;
    let data_end = after_line + len;
    if buf.len() < data_end + 2 {
        return Ok(None);
    }
    if &buf[data_end..data_end + 2] != b"\r\n" {
        return Err(DecodeError::Malformed("bulk payload missing terminating CRLF".into()));
    }
    let data = Bytes::copy_from_slice(&buf[after_line..data_end]);
    let consumed = data_end + 2;
    let value = match tag {
        b'$' => Value::BulkString(data),
        b'=' => {
            if data.len() < 4 {
                return Err(DecodeError::Malformed("verbatim string missing format tag".into()));
            }
            let fmt = String::from_utf8_lossy(&data[..3]).into_owned();
            let body = data.slice(4..);
            Value::VerbatimString(fmt, body)
        }
        b'!' => {
            let msg = String::from_utf8_lossy(&data).into_owned();
            let (kind, rest) = split_error_kind(&msg);
            Value::Error(kind, rest)
        }
        _ => unreachable!("parse_bulk only called for $/=/!"),
    };
    Ok(Some((value, consumed)))
}

fn parse_aggregate(
    tag: u8,
    len_line: &[u8],
    mut pos: usize,
    buf: &[u8],
    max_frame_len: usize,
) -> Result<Option<(Value, usize)>, DecodeError> {
    let len = parse_i64(len_line)?;
    if len < 0 {
        // `*-1\r\n` is the RESP2 nil array.
        return Ok(Some((Value::Nil, pos)));
    }
    check_len(len, max_frame_len)?;
    let count = len as usize;
    let element_count = if tag == b'%' { count * 2 } else { count };

    let mut elements = Vec::with_capacity(element_count.min(1024));
    for _ in 0..element_count {
        match parse_value(&buf[pos..], max_frame_len)? {
            Some((value, consumed)) => {
                elements.push(value);
                pos += consumed;
            }
            None => return Ok(None),
        }
    }

    let value = match tag {
        b'*' => Value::Array(elements),
        b'~' => Value::Set(elements),
        b'>' => {
            let mut iter = elements.into_iter();
            let kind = match iter.next() {
                Some(Value::BulkString(b)) => String::from_utf8_lossy(&b).into_owned(),
                Some(Value::Status(s)) => s,
                _ => String::new(),
            };
            Value::Push(kind, iter.collect())
        }
        b'%' => {
            let mut pairs = Vec::with_capacity(count);
            let mut iter = elements.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                pairs.push((k, v));
            }
            Value::Map(pairs)
        }
        _ => unreachable!("parse_aggregate only called for */%/~/>"),
    };
    Ok(Some((value, pos)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(mut bytes: BytesMut) -> Vec<Value> {
        let mut codec = RespCodec::new();
        let mut out = Vec::new();
        while let Some(v) = codec.decode(&mut bytes).unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn decodes_simple_string() {
        let buf = BytesMut::from(&b"+OK\r\n"[..]);
        assert_eq!(decode_all(buf), vec![Value::Status("OK".into())]);
    }

    #[test]
    fn decodes_error_splitting_kind() {
        let buf = BytesMut::from(&b"-WRONGTYPE Operation against a key\r\n"[..]);
        assert_eq!(
            decode_all(buf),
            vec![Value::Error("WRONGTYPE".into(), "Operation against a key".into())]
        );
    }

    #[test]
    fn decodes_integer_and_double() {
        let buf = BytesMut::from(&b":1000\r\n,3.14\r\n,inf\r\n"[..]);
        assert_eq!(
            decode_all(buf),
            vec![Value::Int(1000), Value::Double(3.14), Value::Double(f64::INFINITY)]
        );
    }

    #[test]
    fn decodes_nil_bulk_and_array() {
        let buf = BytesMut::from(&b"$-1\r\n*-1\r\n"[..]);
        assert_eq!(decode_all(buf), vec![Value::Nil, Value::Nil]);
    }

    #[test]
    fn decodes_bulk_string() {
        let buf = BytesMut::from(&b"$6\r\nfoobar\r\n"[..]);
        assert_eq!(decode_all(buf), vec![Value::bulk(&b"foobar"[..])]);
    }

    #[test]
    fn decodes_nested_array() {
        let buf = BytesMut::from(&b"*2\r\n:1\r\n*1\r\n+OK\r\n"[..]);
        assert_eq!(
            decode_all(buf),
            vec![Value::Array(vec![Value::Int(1), Value::Array(vec![Value::Status("OK".into())])])]
        );
    }

    #[test]
    fn decodes_map_set_push_and_booleans() {
        let buf = BytesMut::from(
            &b"%1\r\n+k\r\n:1\r\n~1\r\n:2\r\n>2\r\n+message\r\n$2\r\nhi\r\n#t\r\n#f\r\n"[..],
        );
        let values = decode_all(buf);
        assert_eq!(
            values,
            vec![
                Value::Map(vec![(Value::Status("k".into()), Value::Int(1))]),
                Value::Set(vec![Value::Int(2)]),
                Value::Push("message".into(), vec![Value::bulk(&b"hi"[..])]),
                Value::Bool(true),
                Value::Bool(false),
            ]
        );
    }

    #[test]
    fn partial_frame_yields_none_without_consuming() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"$6\r\nfoo"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"$6\r\nfoo");
        buf.extend_from_slice(b"bar\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Value::bulk(&b"foobar"[..])));
    }

    #[test]
    fn parse_complete_rejects_partial_frame() {
        assert!(matches!(parse_complete(b"$6\r\nfoo"), Err(DecodeError::Incomplete)));
        assert_eq!(parse_complete(b"+OK\r\n").unwrap(), Value::Status("OK".into()));
    }

    #[test]
    fn oversized_bulk_string_is_rejected() {
        let mut codec = RespCodec::with_max_frame_len(4);
        let mut buf = BytesMut::from(&b"$16\r\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { size: 16, limit: 4 }));
    }

    #[test]
    fn encode_emits_array_of_bulk_strings() {
        let cmd = Command::new("SET").arg("k").arg("v").build().unwrap();
        let mut codec = RespCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(&cmd, &mut dst).unwrap();
        assert_eq!(&dst[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn encode_then_decode_round_trips_argv() {
        let cmd = Command::new("GET").arg("foo").build().unwrap();
        let mut codec = RespCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(&cmd, &mut dst).unwrap();
        // The server's reply is a separate frame; but we can independently
        // decode the command we just encoded by feeding it back through the
        // array branch of the parser.
        let (value, consumed) = parse_value(&dst, DEFAULT_MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(consumed, dst.len());
        match value {
            Value::Array(items) => {
                let strs: Vec<&[u8]> =
                    items.iter().map(|v| v.as_bytes().expect("bulk string")).collect();
                assert_eq!(strs, vec![b"GET".as_slice(), b"foo".as_slice()]);
            }
            _ => panic!("expected array"),
        }
    }
}
