//! Command wrappers: one inherent `impl Client` block per command family,
//! each a thin, typed layer over [`Client::execute`]. Mechanical by design —
//! routing and retry live entirely in [`crate::request_engine`].

mod connection_server;
mod generic;
mod hashes;
mod lists;
mod pubsub;
mod sets;
mod sorted_sets;
mod strings;

use valkey_protocol::{CommandError, Value};

use crate::errors::ClientError;

/// Converts a [`CommandError`] (builder-time misuse, e.g. an empty argv)
/// into the client's error type.
pub(crate) fn cmd_err(e: CommandError) -> ClientError {
    ClientError::InvalidConfig(e.to_string())
}

/// Converts a decoded [`Value`] into a concrete reply type, failing with
/// [`ClientError::InvalidConfig`] if the shape doesn't match what the verb
/// promises.
pub(crate) trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ClientError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Int(n) => Ok(n),
            other => bulk_to_string(&other)?
                .parse()
                .map_err(|_| shape_error("an integer", &other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(n) => Ok(n != 0),
            other => Err(shape_error("a boolean", &other)),
        }
    }
}

impl FromValue for Option<Vec<u8>> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Nil => Ok(None),
            Value::BulkString(b) => Ok(Some(b.to_vec())),
            Value::VerbatimString(_, b) => Ok(Some(b.to_vec())),
            other => Err(shape_error("a bulk string or nil", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match Option::<Vec<u8>>::from_value(value)? {
            Some(bytes) => Ok(bytes),
            None => Ok(Vec::new()),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        let bytes = Vec::<u8>::from_value(value)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl FromValue for Vec<Vec<u8>> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        let items = value
            .as_sequence()
            .ok_or_else(|| shape_error("an array", &value))?;
        items
            .iter()
            .map(|v| Option::<Vec<u8>>::from_value(v.clone()).map(|o| o.unwrap_or_default()))
            .collect()
    }
}

impl FromValue for Vec<(Vec<u8>, Vec<u8>)> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((Vec::<u8>::from_value(k)?, Vec::<u8>::from_value(v)?)))
                .collect(),
            Value::Array(items) | Value::Set(items) => items
                .chunks(2)
                .map(|pair| match pair {
                    [k, v] => Ok((Vec::<u8>::from_value(k.clone())?, Vec::<u8>::from_value(v.clone())?)),
                    _ => Err(ClientError::InvalidConfig("expected a flat key/value array".into())),
                })
                .collect(),
            other => Err(shape_error("a map or flat key/value array", &other)),
        }
    }
}

fn bulk_to_string(value: &Value) -> Result<String, ClientError> {
    value
        .as_bytes()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| shape_error("a bulk string", value))
}

fn shape_error(expected: &str, got: &Value) -> ClientError {
    ClientError::InvalidConfig(format!("expected {expected}, got {got:?}"))
}
