//! Connection handles.
//!
//! A [`PreSession`] is what `PostDial`/`PostAccept` plugins work with: the
//! connection before any application traffic, with direct, sequential
//! `send`/`receive` and the ability to swap the transport. Once every hook
//! has passed, the peer turns it into a [`Session`] driven by a background
//! loop that multiplexes calls, replies and pushes.

use crate::error::WireError;
use crate::message::{decode_message, encode_message, route_path, Header, Message, MessageType};
use crate::transport::{Socket, Transport};
use chrono::{DateTime, Utc};
use ferry_types::error::{
    CODE_BAD_MESSAGE, CODE_CALL_TIMEOUT, CODE_CONN_CLOSED, CODE_INTERNAL_SERVER_ERROR,
    CODE_INVALID_OP, CODE_WRONG_CONN,
};
use ferry_types::{Metadata, Rerror};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

type Decoder<M> = Box<dyn Fn(&[u8]) -> Result<M, serde_json::Error> + Send + Sync>;

/// Route table for [`PreSession::receive`]: which routes are expected during
/// the handshake and how to decode each body into the caller's type `M`.
pub struct EarlyDispatch<M> {
    routes: HashMap<String, Decoder<M>>,
}

impl<M: 'static> EarlyDispatch<M> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Expect `uri` with a JSON body of type `T`, wrapped into `M` by `wrap`.
    pub fn route<T, W>(mut self, uri: &str, wrap: W) -> Self
    where
        T: DeserializeOwned + 'static,
        W: Fn(T) -> M + Send + Sync + 'static,
    {
        self.routes.insert(
            uri.to_string(),
            Box::new(move |body: &[u8]| serde_json::from_slice::<T>(body).map(&wrap)),
        );
        self
    }

    fn decode(&self, uri: &str, body: &[u8]) -> Option<Result<M, serde_json::Error>> {
        self.routes.get(route_path(uri)).map(|decode| decode(body))
    }
}

impl<M: 'static> Default for EarlyDispatch<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// A message received during the handshake.
#[derive(Debug)]
pub struct Early<M> {
    pub uri: String,
    pub meta: Metadata,
    pub body: M,
}

/// A connection during the handshake, before it carries application traffic.
pub struct PreSession {
    id: String,
    peer_name: String,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    tls: bool,
    transport: Option<Box<dyn Transport>>,
    next_seq: u64,
}

impl PreSession {
    pub fn new(
        peer_name: &str,
        tls: bool,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            peer_name: peer_name.to_string(),
            local_addr,
            remote_addr,
            tls,
            transport: Some(transport),
            next_seq: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Whether the owning peer is configured for TLS.
    pub fn tls_enabled(&self) -> bool {
        self.tls
    }

    /// Name of the current transport, or `None` after a failed upgrade.
    pub fn transport_kind(&self) -> Option<&'static str> {
        self.transport.as_ref().map(|t| t.kind())
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn Transport>, Rerror> {
        self.transport
            .as_mut()
            .ok_or_else(|| Rerror::from_code(CODE_CONN_CLOSED, "transport unavailable"))
    }

    /// Push a message with an optional error status.
    pub async fn send<T: Serialize + ?Sized>(
        &mut self,
        uri: &str,
        body: &T,
        status: Option<Rerror>,
    ) -> Result<(), Rerror> {
        let body = serde_json::to_vec(body)
            .map_err(|e| Rerror::from_code(CODE_INTERNAL_SERVER_ERROR, e.to_string()))?;
        let mut header = Header::new(self.next_seq.to_string(), MessageType::Push, uri);
        header.status = status;
        self.next_seq += 1;
        let frame = encode_message(&Message::new(header, body))?;
        self.transport_mut()?.write_frame(&frame).await?;
        Ok(())
    }

    /// Receive one message and decode it through `dispatch`.
    ///
    /// A route missing from `dispatch` is a `CODE_BAD_MESSAGE` error. A
    /// message carrying an error status yields that error.
    pub async fn receive<M: 'static>(
        &mut self,
        dispatch: &EarlyDispatch<M>,
    ) -> Result<Early<M>, Rerror> {
        let frame = self
            .transport_mut()?
            .read_frame()
            .await?
            .ok_or(WireError::ConnectionClosed)?;
        let Message { header, body } = decode_message(frame)?;
        let decoded = dispatch.decode(&header.uri, &body).ok_or_else(|| {
            Rerror::new(
                CODE_BAD_MESSAGE,
                "unexpected early message",
                header.uri.clone(),
            )
        })?;
        if let Some(status) = header.status {
            return Err(status);
        }
        let body = decoded.map_err(|e| Rerror::from_code(CODE_BAD_MESSAGE, e.to_string()))?;
        Ok(Early {
            uri: header.uri,
            meta: header.meta,
            body,
        })
    }

    /// Replace the transport.
    ///
    /// `upgrade` receives the raw socket and must return a fully built
    /// replacement. Nothing is installed until it succeeds. If it fails, the
    /// socket has been consumed by a half-finished exchange, so the
    /// pre-session is left without a transport and the handshake must abort.
    pub async fn modify_socket<F, Fut>(&mut self, upgrade: F) -> Result<(), Rerror>
    where
        F: FnOnce(Socket) -> Fut,
        Fut: Future<Output = Result<Box<dyn Transport>, Rerror>>,
    {
        let current = self
            .transport
            .take()
            .ok_or_else(|| Rerror::from_code(CODE_CONN_CLOSED, "transport unavailable"))?;
        let socket = match current.into_socket() {
            Ok(socket) => socket,
            Err(current) => {
                let kind = current.kind();
                self.transport = Some(current);
                return Err(Rerror::from_code(
                    CODE_WRONG_CONN,
                    format!("{kind} transport cannot be re-wrapped"),
                ));
            }
        };
        let next = upgrade(socket).await?;
        debug!(session = %self.id, transport = next.kind(), "Transport replaced");
        self.transport = Some(next);
        Ok(())
    }

    pub(crate) fn into_parts(self) -> Option<(SessionInfo, Box<dyn Transport>, u64)> {
        let transport = self.transport?;
        Some((
            SessionInfo {
                id: self.id,
                peer_name: self.peer_name,
                local_addr: self.local_addr,
                remote_addr: self.remote_addr,
            },
            transport,
            self.next_seq,
        ))
    }
}

pub(crate) struct SessionInfo {
    pub id: String,
    pub peer_name: String,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

/// Per-call options for outbound calls and pushes.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Explicit sequence; generated when `None`.
    pub seq: Option<String>,
    /// Metadata sent with the message.
    pub meta: Metadata,
    /// Overrides the peer's default call timeout.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seq(mut self, seq: impl Into<String>) -> Self {
        self.seq = Some(seq.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.set(key, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of an outbound call: reply metadata, raw body, and error status.
#[derive(Debug, Clone, Default)]
pub struct CallReply {
    pub meta: Metadata,
    pub body: Vec<u8>,
    pub error: Option<Rerror>,
}

impl CallReply {
    pub fn failed(error: Rerror) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn into_result(self) -> Result<Vec<u8>, Rerror> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.body),
        }
    }
}

pub(crate) struct SessionIo {
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub shutdown: watch::Receiver<bool>,
}

struct SessionInner {
    info: SessionInfo,
    connected_at: DateTime<Utc>,
    call_timeout: Duration,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    next_seq: AtomicU64,
    shutdown: watch::Sender<bool>,
    ended: watch::Sender<bool>,
}

/// An established connection. Cheap to clone; all clones share the
/// connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.info.id)
            .field("remote_addr", &self.inner.info.remote_addr)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(info: SessionInfo, next_seq: u64, call_timeout: Duration) -> (Self, SessionIo) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Self {
            inner: Arc::new(SessionInner {
                info,
                connected_at: Utc::now(),
                call_timeout,
                outbound: outbound_tx,
                pending: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(next_seq),
                shutdown: shutdown_tx,
                ended: watch::channel(false).0,
            }),
        };
        let io = SessionIo {
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        (session, io)
    }

    pub fn id(&self) -> &str {
        &self.inner.info.id
    }

    /// Name of the local peer that owns this session.
    pub fn peer_name(&self) -> &str {
        &self.inner.info.peer_name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.info.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.info.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Close the connection. Frames already queued are still written;
    /// pending calls fail with `CODE_CONN_CLOSED`.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Wait until the session loop has exited.
    pub async fn closed(&self) {
        let mut ended = self.inner.ended.subscribe();
        let _ = ended.wait_for(|ended| *ended).await;
    }

    /// Called by the session loop on exit.
    pub(crate) fn mark_closed(&self) {
        self.inner.shutdown.send_replace(true);
        // Dropping the senders wakes every waiting caller.
        self.pending().clear();
        self.inner.ended.send_replace(true);
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Message>>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_seq(&self) -> String {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed).to_string()
    }

    pub(crate) fn enqueue(&self, msg: &Message) -> Result<(), Rerror> {
        let frame = encode_message(msg)?;
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| Rerror::from_code(CODE_CONN_CLOSED, self.id().to_string()))
    }

    /// Hand a reply to the call waiting on its seq.
    pub(crate) fn complete_reply(&self, msg: Message) {
        let waiter = self.pending().remove(&msg.header.seq);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => debug!(
                session = %self.id(),
                seq = %msg.header.seq,
                "Reply for unknown or expired call"
            ),
        }
    }

    /// Call `uri` with a raw body and wait for the reply.
    pub async fn call_raw(&self, uri: &str, body: Vec<u8>, options: CallOptions) -> CallReply {
        let seq = options.seq.unwrap_or_else(|| self.next_seq());
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending();
            if pending.contains_key(&seq) {
                return CallReply::failed(Rerror::new(
                    CODE_INVALID_OP,
                    "duplicate call sequence",
                    seq,
                ));
            }
            pending.insert(seq.clone(), tx);
        }

        let mut header = Header::new(seq.clone(), MessageType::Call, uri);
        header.meta = options.meta;
        if let Err(err) = self.enqueue(&Message::new(header, body)) {
            self.pending().remove(&seq);
            return CallReply::failed(err);
        }
        if self.is_closed() {
            self.pending().remove(&seq);
            return CallReply::failed(Rerror::from_code(CODE_CONN_CLOSED, self.id().to_string()));
        }

        let timeout = options.timeout.unwrap_or(self.inner.call_timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => CallReply {
                meta: reply.header.meta,
                body: reply.body,
                error: reply.header.status,
            },
            Ok(Err(_)) => {
                CallReply::failed(Rerror::from_code(CODE_CONN_CLOSED, self.id().to_string()))
            }
            Err(_) => {
                self.pending().remove(&seq);
                CallReply::failed(Rerror::from_code(
                    CODE_CALL_TIMEOUT,
                    format!("{uri} timed out after {}ms", timeout.as_millis()),
                ))
            }
        }
    }

    /// Call `uri` with a JSON argument and decode the JSON result.
    pub async fn call<A, R>(&self, uri: &str, arg: &A, options: CallOptions) -> Result<R, Rerror>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(arg)
            .map_err(|e| Rerror::from_code(CODE_BAD_MESSAGE, e.to_string()))?;
        let reply = self.call_raw(uri, body, options).await.into_result()?;
        serde_json::from_slice(&reply).map_err(|e| Rerror::from_code(CODE_BAD_MESSAGE, e.to_string()))
    }

    /// Push a raw body to `uri`. Completes once the message is queued.
    pub fn push_raw(&self, uri: &str, body: Vec<u8>, options: CallOptions) -> Result<(), Rerror> {
        let seq = options.seq.unwrap_or_else(|| self.next_seq());
        let mut header = Header::new(seq, MessageType::Push, uri);
        header.meta = options.meta;
        self.enqueue(&Message::new(header, body))
    }

    /// Push a JSON argument to `uri`.
    pub fn push<A: Serialize + ?Sized>(
        &self,
        uri: &str,
        arg: &A,
        options: CallOptions,
    ) -> Result<(), Rerror> {
        let body = serde_json::to_vec(arg)
            .map_err(|e| Rerror::from_code(CODE_BAD_MESSAGE, e.to_string()))?;
        self.push_raw(uri, body, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LengthPrefixed;
    use std::collections::HashMap as Map;

    #[derive(Debug, PartialEq)]
    enum Hello {
        Ping(Map<String, String>),
        Pong(String),
    }

    fn pair() -> (PreSession, PreSession) {
        let (a, b) = tokio::io::duplex(4096);
        let addr_a: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let addr_b: SocketAddr = "127.0.0.1:2000".parse().unwrap();
        (
            PreSession::new("a", false, addr_a, addr_b, Box::new(LengthPrefixed::new(Box::new(a)))),
            PreSession::new("b", false, addr_b, addr_a, Box::new(LengthPrefixed::new(Box::new(b)))),
        )
    }

    fn dispatch() -> EarlyDispatch<Hello> {
        EarlyDispatch::new()
            .route("/early/ping", Hello::Ping)
            .route("/early/pong", Hello::Pong)
    }

    #[tokio::test]
    async fn test_send_receive_typed_dispatch() {
        let (mut client, mut server) = pair();
        let mut ping = Map::new();
        ping.insert("author".to_string(), "bob".to_string());
        client.send("/early/ping", &ping, None).await.unwrap();

        let got = server.receive(&dispatch()).await.unwrap();
        assert_eq!(got.uri, "/early/ping");
        assert_eq!(got.body, Hello::Ping(ping));
    }

    #[tokio::test]
    async fn test_unmapped_route_is_bad_message() {
        let (mut client, mut server) = pair();
        client.send("/surprise", &1, None).await.unwrap();
        let err = server.receive(&dispatch()).await.unwrap_err();
        assert_eq!(err.code, CODE_BAD_MESSAGE);
        assert_eq!(err.detail, "/surprise");
    }

    #[tokio::test]
    async fn test_status_surfaces_as_error() {
        let (mut client, mut server) = pair();
        server
            .send("/early/pong", "", Some(Rerror::new(10005, "incorrect author", "alice")))
            .await
            .unwrap();
        let err = client.receive(&dispatch()).await.unwrap_err();
        assert_eq!(err, Rerror::new(10005, "incorrect author", "alice"));
    }

    #[tokio::test]
    async fn test_receive_after_close() {
        let (client, mut server) = pair();
        drop(client);
        let err = server.receive(&dispatch()).await.unwrap_err();
        assert_eq!(err.code, CODE_CONN_CLOSED);
    }

    #[tokio::test]
    async fn test_failed_upgrade_leaves_no_transport() {
        let (mut client, _server) = pair();
        let err = client
            .modify_socket(|_socket| async { Err(Rerror::new(105, "upgrade failed", "nope")) })
            .await
            .unwrap_err();
        assert_eq!(err.code, 105);
        assert_eq!(client.transport_kind(), None);
        assert_eq!(
            client.send("/x", &(), None).await.unwrap_err().code,
            CODE_CONN_CLOSED
        );
    }

    #[tokio::test]
    async fn test_successful_upgrade_installs_new_transport() {
        let (mut client, mut server) = pair();
        client
            .modify_socket(|socket| async move {
                Ok(Box::new(LengthPrefixed::new(socket)) as Box<dyn Transport>)
            })
            .await
            .unwrap();
        assert_eq!(client.transport_kind(), Some("tcp"));
        client.send("/early/pong", "ok", None).await.unwrap();
        let got = server.receive(&dispatch()).await.unwrap();
        assert_eq!(got.body, Hello::Pong("ok".to_string()));
    }
}
