//! Wire-level building blocks for talking to a Valkey/Redis node: the
//! [`Value`] reply type, the [`Command`]/[`CommandBuilder`] request type,
//! cluster hash-slot calculation, and the [`RespCodec`] that moves bytes
//! between the two.
//!
//! This crate has no notion of a connection, a cluster topology, or retry
//! policy — those live one layer up, in `valkey-client`. It only knows how
//! to turn bytes into [`Value`]s and [`Command`]s into bytes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod command;
mod error;
mod slot;
mod value;

pub use codec::{encode_argv, parse_complete, RespCodec, DEFAULT_MAX_FRAME_LEN};
pub use command::{Command, CommandBuilder, KeySpec};
pub use error::{CommandError, DecodeError};
pub use slot::{common_slot, hash_tag, key_slot, SLOT_COUNT};
pub use value::{split_error_kind, Value};
