//! One transport to one node: handshake, the writer/reader task split, and
//! the in-flight correlation queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures_channel::{mpsc, oneshot};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};
use valkey_protocol::{Command, RespCodec, Value};

use crate::config::{ClientConfig, ProtocolVersion};
use crate::errors::{ClientError, Result};
use crate::subscription::SubscriptionSnapshot;
use crate::topology::NodeAddress;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Dialing the transport.
    Connecting = 0,
    /// Running `HELLO`/`AUTH`/`CLIENT SETNAME`/`SELECT`/subscribe handshake.
    Handshaking = 1,
    /// Accepting request/response traffic.
    Ready = 2,
    /// A RESP2 connection that has issued subscribe commands: only
    /// subscription-management verbs may be sent.
    Subscribed = 3,
    /// Failing in-flight futures after a write/read error; no new sends
    /// accepted.
    Draining = 4,
    /// Terminal.
    Closed = 5,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Ready,
            3 => ConnectionState::Subscribed,
            4 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// A push frame surfaced from a `Subscribed` connection.
#[derive(Debug, Clone)]
pub struct PushFrame {
    /// `"message"`, `"pmessage"`, `"smessage"`, or a subscribe/unsubscribe
    /// acknowledgement kind.
    pub kind: String,
    /// The remaining elements of the push frame (channel, pattern, payload
    /// — shape depends on `kind`).
    pub items: Vec<Value>,
}

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

async fn dial(addr: &NodeAddress, config: &ClientConfig) -> Result<Box<dyn AsyncStream>> {
    let tcp = timeout(config.connection_timeout, TcpStream::connect((addr.host.as_str(), addr.port)))
        .await
        .map_err(|_| ClientError::ConnectionError(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")))?
        .map_err(ClientError::ConnectionError)?;
    tcp.set_nodelay(true).map_err(ClientError::ConnectionError)?;

    if config.use_tls {
        return dial_tls(tcp, addr, config).await;
    }
    Ok(Box::new(tcp))
}

#[cfg(feature = "tls")]
async fn dial_tls(tcp: TcpStream, addr: &NodeAddress, _config: &ClientConfig) -> Result<Box<dyn AsyncStream>> {
    use std::sync::Arc as StdArc;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig as TlsClientConfig, RootCertStore};

    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().map_err(|e| {
        ClientError::ConnectionError(std::io::Error::new(std::io::ErrorKind::Other, e))
    })? {
        let _ = roots.add(cert);
    }
    let tls_config = TlsClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(StdArc::new(tls_config));
    let server_name = ServerName::try_from(addr.host.clone())
        .map_err(|_| ClientError::InvalidConfig(format!("invalid TLS server name: {}", addr.host)))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(ClientError::ConnectionError)?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "tls"))]
async fn dial_tls(_tcp: TcpStream, _addr: &NodeAddress, _config: &ClientConfig) -> Result<Box<dyn AsyncStream>> {
    Err(ClientError::InvalidConfig("use_tls requires the `tls` crate feature".into()))
}

struct WriteItem {
    command: Command,
    reply: oneshot::Sender<std::result::Result<Value, ClientError>>,
}

/// One transport to one node. Cheap to clone: clones share the same writer
/// channel and in-flight queue.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    addr: NodeAddress,
    state: AtomicU8,
    write_tx: mpsc::UnboundedSender<WriteItem>,
    in_flight: Mutex<VecDeque<oneshot::Sender<std::result::Result<Value, ClientError>>>>,
}

const PUSH_KINDS: &[&str] = &[
    "message",
    "pmessage",
    "smessage",
    "subscribe",
    "psubscribe",
    "ssubscribe",
    "unsubscribe",
    "punsubscribe",
    "sunsubscribe",
];

fn looks_like_subscribe_push(value: &Value) -> Option<(String, Vec<Value>)> {
    let items = value.as_sequence()?;
    let (first, rest) = items.split_first()?;
    let kind = String::from_utf8_lossy(first.as_bytes()?).into_owned();
    PUSH_KINDS.contains(&kind.as_str()).then(|| (kind, rest.to_vec()))
}

impl Connection {
    /// Dials `addr`, runs the handshake (`HELLO`/`AUTH`/`CLIENT SETNAME`/
    /// `SELECT`/subscribe), and spawns the writer/reader task pair. On
    /// success the connection is `Ready` (or
    /// `Subscribed` if `subscription_config` was set).
    pub async fn connect(
        addr: NodeAddress,
        config: Arc<ClientConfig>,
        push_tx: Option<mpsc::UnboundedSender<PushFrame>>,
        subscriptions: SubscriptionSnapshot,
    ) -> Result<Connection> {
        let stream = dial(&addr, &config).await?;
        let mut framed = Framed::new(stream, RespCodec::new());

        handshake(&mut framed, &addr, &config).await?;

        let subscribed = if subscriptions.exact.is_empty()
            && subscriptions.patterns.is_empty()
            && subscriptions.sharded.is_empty()
        {
            false
        } else {
            issue_subscriptions(&mut framed, &subscriptions).await?;
            true
        };

        let (write_tx, write_rx) = mpsc::unbounded();
        let (sink, stream) = framed.split();

        let inner = Arc::new(Inner {
            addr,
            state: AtomicU8::new(if subscribed {
                ConnectionState::Subscribed as u8
            } else {
                ConnectionState::Ready as u8
            }),
            write_tx,
            in_flight: Mutex::new(VecDeque::new()),
        });

        tokio::spawn(writer_task(inner.clone(), sink, write_rx));
        tokio::spawn(reader_task(inner.clone(), stream, push_tx));

        Ok(Connection { inner })
    }

    /// This connection's node address.
    pub fn address(&self) -> &NodeAddress {
        &self.inner.addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.inner.state.load(Ordering::Acquire))
    }

    /// `true` if the connection currently accepts request traffic.
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), ConnectionState::Ready | ConnectionState::Subscribed)
    }

    /// Sends a single command and awaits its reply.
    pub async fn send(&self, command: Command) -> Result<Value> {
        let mut replies = self.send_many(vec![command]).await?;
        Ok(replies.pop().expect("send_many returns exactly one reply per input command"))
    }

    /// Sends `commands` as a single flush and collects one reply per
    /// command, in order. Used both for plain pipelines and for
    /// MULTI/...`/EXEC-wrapped transactions (the caller includes those
    /// bracketing commands itself).
    pub async fn send_many(&self, commands: Vec<Command>) -> Result<Vec<Value>> {
        if self.state() == ConnectionState::Closed || self.state() == ConnectionState::Draining {
            return Err(ClientError::ConnectionError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection is closed",
            )));
        }

        let mut receivers = Vec::with_capacity(commands.len());
        for command in commands {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            self.inner
                .write_tx
                .unbounded_send(WriteItem { command, reply: tx })
                .map_err(|_| {
                    ClientError::ConnectionError(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "writer task has stopped",
                    ))
                })?;
        }

        let mut values = Vec::with_capacity(receivers.len());
        for rx in receivers {
            let value = rx.await.map_err(|_| {
                ClientError::ConnectionError(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection closed before a reply arrived",
                ))
            })??;
            values.push(value);
        }
        Ok(values)
    }
}

/// Transitions `inner` to `Closed` and fails every queued in-flight sender
/// with a clone of `err`. Used by both task loops to drain the queue on
/// write/read failure or peer close.
fn fail_all_in_flight(inner: &Inner, err: ClientError) {
    inner.state.store(ConnectionState::Closed as u8, Ordering::Release);
    let mut queue = inner.in_flight.lock().unwrap();
    while let Some(sender) = queue.pop_front() {
        let _ = sender.send(Err(clone_client_error(&err)));
    }
}

/// `ClientError` is not `Clone` (it wraps `io::Error`); this reconstructs an
/// equivalent error for fanning one failure out to every queued sink.
fn clone_client_error(err: &ClientError) -> ClientError {
    match err {
        ClientError::ConnectionError(e) => {
            ClientError::ConnectionError(std::io::Error::new(e.kind(), e.to_string()))
        }
        other => ClientError::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::Other,
            other.to_string(),
        )),
    }
}

async fn writer_task<S>(
    inner: Arc<Inner>,
    mut sink: S,
    mut write_rx: mpsc::UnboundedReceiver<WriteItem>,
) where
    S: futures_util::Sink<Command, Error = valkey_protocol::DecodeError> + Unpin,
{
    while let Some(item) = write_rx.next().await {
        inner.in_flight.lock().unwrap().push_back(item.reply);
        if let Err(e) = sink.send(item.command).await {
            warn!(target: "valkey_client::connection", error = %e, "write failed, draining connection");
            break;
        }
    }
    inner.state.store(ConnectionState::Draining as u8, Ordering::Release);
    fail_all_in_flight(
        &inner,
        ClientError::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "connection writer task stopped",
        )),
    );
}

async fn reader_task<S>(
    inner: Arc<Inner>,
    mut stream: S,
    push_tx: Option<mpsc::UnboundedSender<PushFrame>>,
) where
    S: futures_util::Stream<Item = std::result::Result<Value, valkey_protocol::DecodeError>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(value)) => {
                if let Value::Push(kind, items) = value {
                    dispatch_push(&push_tx, kind, items);
                    continue;
                }
                if inner.state.load(Ordering::Acquire) == ConnectionState::Subscribed as u8 {
                    if let Some((kind, items)) = looks_like_subscribe_push(&value) {
                        dispatch_push(&push_tx, kind, items);
                        continue;
                    }
                }
                let reply = match value.as_error() {
                    Some((kind, message)) => Err(ClientError::request_error(kind, message)),
                    None => Ok(value),
                };
                let next = inner.in_flight.lock().unwrap().pop_front();
                if let Some(sender) = next {
                    let _ = sender.send(reply);
                } else {
                    trace!(target: "valkey_client::connection", "dropped reply with no waiting sink");
                }
            }
            Some(Err(e)) => {
                warn!(target: "valkey_client::connection", error = %e, "decode error, draining connection");
                break;
            }
            None => break,
        }
    }

    inner.state.store(ConnectionState::Draining as u8, Ordering::Release);
    fail_all_in_flight(
        &inner,
        ClientError::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection closed by peer",
        )),
    );
}

fn dispatch_push(push_tx: &Option<mpsc::UnboundedSender<PushFrame>>, kind: String, items: Vec<Value>) {
    if let Some(tx) = push_tx {
        let _ = tx.unbounded_send(PushFrame { kind, items });
    }
}

async fn handshake<S>(framed: &mut Framed<S, RespCodec>, addr: &NodeAddress, config: &ClientConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello_version = match config.protocol {
        ProtocolVersion::Resp3 => "3",
        ProtocolVersion::Resp2 => "2",
    };
    let mut hello = Command::new("HELLO").arg(hello_version);
    if let Some(password) = &config.credentials.password {
        let username = config.credentials.username.clone().unwrap_or_else(|| "default".into());
        hello = hello.arg("AUTH").arg(username).arg(password.clone());
    }
    let hello = hello.build().map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

    let reply = round_trip(framed, hello).await;
    if reply.is_err() && matches!(config.protocol, ProtocolVersion::Resp3) {
        debug!(target: "valkey_client::connection", node = %addr, "HELLO 3 refused, falling back to RESP2");
        let mut fallback = Command::new("HELLO").arg("2");
        if let Some(password) = &config.credentials.password {
            let username = config.credentials.username.clone().unwrap_or_else(|| "default".into());
            fallback = fallback.arg("AUTH").arg(username).arg(password.clone());
        }
        let fallback = fallback.build().map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        round_trip(framed, fallback).await?;
    } else {
        reply?;
    }

    if let Some(name) = &config.client_name {
        let cmd = Command::new("CLIENT").arg("SETNAME").arg(name.clone()).build().unwrap();
        round_trip(framed, cmd).await?;
    }
    if config.database_id != 0 {
        let cmd = Command::new("SELECT").arg(config.database_id.to_string()).build().unwrap();
        round_trip(framed, cmd).await?;
    }
    Ok(())
}

async fn round_trip<S>(framed: &mut Framed<S, RespCodec>, command: Command) -> Result<Value>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(command).await.map_err(|e| {
        ClientError::ConnectionError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    })?;
    match framed.next().await {
        Some(Ok(value)) => match value.as_error() {
            Some((kind, message)) => Err(ClientError::request_error(kind, message)),
            None => Ok(value),
        },
        Some(Err(e)) => Err(ClientError::from(e)),
        None => Err(ClientError::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed during handshake",
        ))),
    }
}

async fn issue_subscriptions<S>(
    framed: &mut Framed<S, RespCodec>,
    sub: &SubscriptionSnapshot,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for (verb, channels) in [
        ("SUBSCRIBE", &sub.exact),
        ("PSUBSCRIBE", &sub.patterns),
        ("SSUBSCRIBE", &sub.sharded),
    ] {
        if channels.is_empty() {
            continue;
        }
        let cmd = Command::new(verb).args(channels.iter().cloned()).build().unwrap();
        framed.send(cmd).await.map_err(|e| {
            ClientError::ConnectionError(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        for _ in channels {
            framed.next().await.ok_or_else(|| {
                ClientError::ConnectionError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed during subscribe handshake",
                ))
            })??;
        }
    }
    Ok(())
}
