//! Exercises the crate's public surface the way a caller outside the crate
//! would use it, rather than poking at internals the way the in-module unit
//! tests do.

use valkey_protocol::{common_slot, key_slot, Command, KeySpec, RespCodec, Value};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn mget_command_resolves_keys_that_share_a_cluster_slot() {
    let cmd = Command::new("MGET")
        .args(["{user:1}.name", "{user:1}.email"])
        .key_spec(KeySpec::range_to_end(1, 1))
        .build()
        .unwrap();

    let keys: Vec<&[u8]> = cmd.keys().collect();
    assert_eq!(keys, vec![b"{user:1}.name".as_slice(), b"{user:1}.email".as_slice()]);
    assert_eq!(common_slot(keys.into_iter()), Ok(Some(key_slot(b"{user:1}.name"))));
}

#[test]
fn cross_slot_keys_are_reported_with_both_slots() {
    let cmd = Command::new("MGET")
        .args(["{a}1", "{b}2"])
        .key_spec(KeySpec::range_to_end(1, 1))
        .build()
        .unwrap();

    let keys: Vec<&[u8]> = cmd.keys().collect();
    let err = common_slot(keys.into_iter()).unwrap_err();
    assert_eq!(err, (key_slot(b"{a}1"), key_slot(b"{b}2")));
}

#[test]
fn a_command_encoded_by_the_codec_decodes_back_into_the_same_argv() {
    let cmd = Command::new("SET").arg("session:42").arg("active").build().unwrap();

    let mut codec = RespCodec::new();
    let mut wire = BytesMut::new();
    Encoder::<&Command>::encode(&mut codec, &cmd, &mut wire).unwrap();

    let decoded = codec.decode(&mut wire).unwrap().expect("a full frame was written");
    let items = match decoded {
        Value::Array(items) => items,
        other => panic!("expected an array frame, got {other:?}"),
    };
    let words: Vec<&[u8]> = items.iter().map(|v| v.as_bytes().unwrap()).collect();
    assert_eq!(words, vec![b"SET".as_slice(), b"session:42".as_slice(), b"active".as_slice()]);
}

#[test]
fn server_error_replies_split_into_kind_and_message() {
    let mut codec = RespCodec::new();
    let mut wire = BytesMut::from(&b"-MOVED 3999 127.0.0.1:7001\r\n"[..]);
    let value = codec.decode(&mut wire).unwrap().unwrap();
    let (kind, message) = value.as_error().expect("a server error reply");
    assert_eq!(kind, "MOVED");
    assert_eq!(message, "3999 127.0.0.1:7001");
}
