//! Exercises [`Client`] end-to-end against a tiny hand-rolled RESP server,
//! rather than mocking the transport trait directly.

use std::collections::HashMap;

use futures_util::StreamExt;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;

use valkey_client::{Client, NodeAddress, PeriodicChecks, Value};
use valkey_protocol::RespCodec;

async fn spawn_mock_node() -> NodeAddress {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock listener");
    let local = listener.local_addr().unwrap();
    tokio::spawn(accept_loop(listener));
    NodeAddress::new(local.ip().to_string(), local.port())
}

async fn accept_loop(listener: TcpListener) {
    loop {
        let Ok((stream, _)) = listener.accept().await else { return };
        tokio::spawn(serve_connection(stream));
    }
}

async fn serve_connection(stream: TcpStream) {
    let (read_half, mut write_half): (ReadHalf<TcpStream>, WriteHalf<TcpStream>) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, RespCodec::new());
    let mut store: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

    while let Some(Ok(frame)) = reader.next().await {
        let Some(argv) = frame.as_sequence() else { continue };
        let Some(verb) = argv.first().and_then(Value::as_bytes) else { continue };
        let reply = dispatch(&verb.to_ascii_uppercase(), argv, &mut store);
        if write_half.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn dispatch(verb: &[u8], argv: &[Value], store: &mut HashMap<Vec<u8>, Vec<u8>>) -> Vec<u8> {
    match verb {
        b"HELLO" => encode_status("OK"),
        b"PING" => encode_status("PONG"),
        b"CLUSTER" => encode_status("OK"),
        b"SET" => {
            store.insert(arg_bytes(argv, 1), arg_bytes(argv, 2));
            encode_status("OK")
        }
        b"GET" => match store.get(&arg_bytes(argv, 1)) {
            Some(value) => encode_bulk(value),
            None => encode_nil(),
        },
        b"DEL" => {
            let removed = argv[1..].iter().filter_map(Value::as_bytes).filter(|k| store.remove(*k).is_some()).count();
            encode_int(removed as i64)
        }
        _ => encode_status("OK"),
    }
}

fn arg_bytes(argv: &[Value], index: usize) -> Vec<u8> {
    argv.get(index).and_then(Value::as_bytes).unwrap_or_default().to_vec()
}

fn encode_status(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

fn encode_bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn encode_nil() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn encode_int(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

async fn connected_client() -> Client {
    let addr = spawn_mock_node().await;
    Client::builder(vec![addr])
        .cluster_mode(false)
        .periodic_checks(PeriodicChecks::Disabled)
        .build()
        .await
        .expect("client should connect to the mock node")
}

#[tokio::test]
async fn ping_succeeds_against_a_standalone_node() {
    let client = connected_client().await;
    client.ping().await.expect("PING should succeed");
    client.close();
}

#[tokio::test]
async fn set_then_get_round_trips_a_value() {
    let client = connected_client().await;

    client.set("greeting", "hello").await.expect("SET should succeed");
    let value = client.get("greeting").await.expect("GET should succeed");
    assert_eq!(value, Some(b"hello".to_vec()));

    let missing = client.get("absent").await.expect("GET of a missing key should succeed");
    assert_eq!(missing, None);

    client.close();
}

#[tokio::test]
async fn del_reports_how_many_keys_were_removed() {
    let client = connected_client().await;

    client.set("a", "1").await.unwrap();
    client.set("b", "2").await.unwrap();

    let removed = client.del(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).await.unwrap();
    assert_eq!(removed, 2);

    client.close();
}
