//! Peer — TCP server and client for Ferry sessions.
//!
//! A [`Peer`] owns an ordered plugin list, a route table and a hub of live
//! sessions. It accepts inbound connections and dials outbound ones; either
//! way the connection first passes through the plugin handshake hooks, then
//! enters a per-session loop that reads frames, runs header hooks, dispatches
//! calls and pushes to handlers, and matches replies to pending calls.

use crate::context::{call_fn, push_fn, CallHandler, PushHandler, ReadCtx, RequestCtx};
use crate::error::WireError;
use crate::message::{decode_message, Header, Message, MessageType};
use crate::plugin::{EarlyPeer, Plugin, PluginContainer};
use crate::registry::SessionHub;
use crate::session::{PreSession, Session, SessionIo};
use crate::transport::{LengthPrefixed, Transport};
use ferry_types::error::{CODE_CONN_CLOSED, CODE_DIAL_FAILED, CODE_NOT_FOUND};
use ferry_types::{Metadata, PeerConfig, Rerror, SeqGenerator};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct Router {
    calls: HashMap<String, Arc<dyn CallHandler>>,
    pushes: HashMap<String, Arc<dyn PushHandler>>,
    unknown_call: Option<Arc<dyn CallHandler>>,
    unknown_push: Option<Arc<dyn PushHandler>>,
}

/// A local endpoint that listens for and dials Ferry sessions.
pub struct Peer {
    config: PeerConfig,
    plugins: PluginContainer,
    router: RwLock<Router>,
    hub: SessionHub,
    seqs: Arc<SeqGenerator>,
    shutdown: watch::Sender<bool>,
}

impl Peer {
    /// Build a peer and fire every `PostNewPeer` hook.
    pub fn new(config: PeerConfig, plugins: Vec<Arc<dyn Plugin>>) -> Result<Arc<Self>, Rerror> {
        let (shutdown, _) = watch::channel(false);
        let peer = Self {
            seqs: Arc::new(SeqGenerator::new(config.name.clone())),
            config,
            plugins: PluginContainer::new(plugins),
            router: RwLock::new(Router::default()),
            hub: SessionHub::new(),
            shutdown,
        };
        peer.plugins.post_new_peer(&peer)?;
        info!(
            peer = %peer.config.name,
            plugins = ?peer.plugins.names(),
            "Peer created"
        );
        Ok(Arc::new(peer))
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn plugins(&self) -> &PluginContainer {
        &self.plugins
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.hub.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.hub.count()
    }

    fn router_mut(&self) -> std::sync::RwLockWriteGuard<'_, Router> {
        self.router.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a typed call route.
    pub fn route_call_fn<A, R, F, Fut>(&self, uri: &str, f: F)
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Rerror>> + Send + 'static,
    {
        self.route_call(uri, call_fn(f));
    }

    /// Register a typed push route.
    pub fn route_push_fn<A, F, Fut>(&self, uri: &str, f: F)
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Rerror>> + Send + 'static,
    {
        self.route_push(uri, push_fn(f));
    }

    fn call_handler(&self, path: &str) -> Option<Arc<dyn CallHandler>> {
        let router = self.router.read().unwrap_or_else(|e| e.into_inner());
        router
            .calls
            .get(path)
            .cloned()
            .or_else(|| router.unknown_call.clone())
    }

    fn push_handler(&self, path: &str) -> Option<Arc<dyn PushHandler>> {
        let router = self.router.read().unwrap_or_else(|e| e.into_inner());
        router
            .pushes
            .get(path)
            .cloned()
            .or_else(|| router.unknown_push.clone())
    }

    /// Bind the configured address and serve in the background.
    ///
    /// Returns the bound address (useful when binding to port 0).
    pub async fn listen(self: &Arc<Self>) -> Result<SocketAddr, WireError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(peer = %self.config.name, "Listening on {}", local_addr);
        let peer = Arc::clone(self);
        tokio::spawn(async move { peer.accept_loop(listener).await });
        Ok(local_addr)
    }

    /// Bind the configured address and serve until [`Peer::close`].
    pub async fn listen_and_serve(self: &Arc<Self>) -> Result<(), WireError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(peer = %self.config.name, "Listening on {}", listener.local_addr()?);
        Arc::clone(self).accept_loop(listener).await;
        Ok(())
    }

    /// Connect to `addr`, run the `PostDial` hooks and start the session.
    pub async fn dial(self: &Arc<Self>, addr: SocketAddr) -> Result<Session, Rerror> {
        let stream = match tokio::time::timeout(self.config.dial_timeout(), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Rerror::from_code(CODE_DIAL_FAILED, format!("{addr}: {e}"))),
            Err(_) => {
                return Err(Rerror::from_code(
                    CODE_DIAL_FAILED,
                    format!("{addr}: connect timed out"),
                ))
            }
        };
        let _ = stream.set_nodelay(true);
        let local_addr = stream
            .local_addr()
            .map_err(|e| Rerror::from_code(CODE_DIAL_FAILED, e.to_string()))?;

        let mut pre = self.pre_session(stream, local_addr, addr);
        let handshake = self.plugins.post_dial(&mut pre);
        match tokio::time::timeout(self.config.handshake_timeout(), handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(remote = %addr, error = %e, "Dial handshake failed");
                return Err(e);
            }
            Err(_) => {
                warn!(remote = %addr, "Dial handshake timed out");
                return Err(Rerror::from_code(CODE_DIAL_FAILED, "handshake timed out"));
            }
        }
        let session = self.establish(pre)?;
        info!(session = %session.id(), remote = %addr, "Dialed");
        Ok(session)
    }

    /// Stop accepting and close every session.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
        for session in self.hub.all() {
            session.close();
        }
        info!(peer = %self.config.name, "Peer closed");
    }

    fn pre_session(&self, stream: TcpStream, local: SocketAddr, remote: SocketAddr) -> PreSession {
        PreSession::new(
            &self.config.name,
            self.config.tls,
            local,
            remote,
            Box::new(LengthPrefixed::new(Box::new(stream))),
        )
    }

    /// Turn a handshaken pre-session into a live session.
    fn establish(self: &Arc<Self>, pre: PreSession) -> Result<Session, Rerror> {
        let (info, transport, next_seq) = pre
            .into_parts()
            .ok_or_else(|| Rerror::from_code(CODE_CONN_CLOSED, "transport unavailable"))?;
        let (session, io) = Session::new(info, next_seq, self.config.call_timeout());
        self.hub.insert(session.clone());
        // close() may have swept the hub while this connection was handshaking.
        if *self.shutdown.borrow() {
            self.hub.remove(session.id());
            session.mark_closed();
            return Err(Rerror::from_code(CODE_CONN_CLOSED, "peer is closed"));
        }
        let peer = Arc::clone(self);
        let handle = session.clone();
        tokio::spawn(async move { peer.session_loop(handle, transport, io).await });
        Ok(session)
    }

    /// Internal accept loop; runs until shutdown.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        let peer = Arc::clone(&self);
                        tokio::spawn(async move { peer.handle_inbound(stream, addr).await });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!(peer = %self.config.name, "Accept loop stopped");
    }

    /// Run the `PostAccept` hooks on an inbound connection, then start it.
    async fn handle_inbound(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let local_addr = match stream.local_addr() {
            Ok(a) => a,
            Err(e) => {
                debug!("Inbound connection from {} unusable: {}", addr, e);
                return;
            }
        };
        let mut pre = self.pre_session(stream, local_addr, addr);
        let handshake = self.plugins.post_accept(&mut pre);
        match tokio::time::timeout(self.config.handshake_timeout(), handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(remote = %addr, error = %e, "Inbound handshake rejected");
                return;
            }
            Err(_) => {
                warn!(remote = %addr, "Inbound handshake timed out");
                return;
            }
        }
        match self.establish(pre) {
            Ok(session) => info!(session = %session.id(), remote = %addr, "Accepted"),
            Err(e) => warn!(remote = %addr, error = %e, "Inbound session not started"),
        }
    }

    /// Read/write loop for one established session.
    async fn session_loop(
        self: Arc<Self>,
        session: Session,
        mut transport: Box<dyn Transport>,
        mut io: SessionIo,
    ) {
        loop {
            tokio::select! {
                frame = transport.read_frame() => match frame {
                    Ok(Some(frame)) => self.handle_frame(&session, frame),
                    Ok(None) => {
                        debug!(session = %session.id(), "Closed by remote");
                        break;
                    }
                    Err(e) => {
                        debug!(session = %session.id(), error = %e, "Read failed");
                        break;
                    }
                },
                outbound = io.outbound.recv() => match outbound {
                    Some(frame) => {
                        if let Err(e) = transport.write_frame(&frame).await {
                            debug!(session = %session.id(), error = %e, "Write failed");
                            break;
                        }
                    }
                    None => break,
                },
                _ = io.shutdown.changed() => {
                    while let Ok(frame) = io.outbound.try_recv() {
                        if transport.write_frame(&frame).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
        session.mark_closed();
        self.hub.remove(session.id());
        debug!(session = %session.id(), "Session ended");
    }

    fn handle_frame(&self, session: &Session, frame: Vec<u8>) {
        let Message { mut header, body } = match decode_message(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session = %session.id(), error = %e, "Dropping undecodable frame");
                return;
            }
        };
        match header.mtype {
            MessageType::Reply => session.complete_reply(Message::new(header, body)),
            MessageType::Call => {
                let hooked = self
                    .plugins
                    .post_read_call_header(&mut ReadCtx::new(session, &mut header));
                if let Err(e) = hooked {
                    reply(session, header, Metadata::new(), Vec::new(), Some(e));
                    return;
                }
                let handler = self.call_handler(header.path());
                let session = session.clone();
                tokio::spawn(async move {
                    let Some(handler) = handler else {
                        let not_found = Rerror::from_code(CODE_NOT_FOUND, header.uri.clone());
                        reply(&session, header, Metadata::new(), Vec::new(), Some(not_found));
                        return;
                    };
                    let mut ctx = RequestCtx::new(session.clone(), header.clone(), body);
                    let result = handler.handle_call(&mut ctx).await;
                    let meta = ctx.take_reply_meta();
                    match result {
                        Ok(body) => reply(&session, header, meta, body, None),
                        Err(e) => reply(&session, header, meta, Vec::new(), Some(e)),
                    }
                });
            }
            MessageType::Push => {
                let hooked = self
                    .plugins
                    .post_read_push_header(&mut ReadCtx::new(session, &mut header));
                if let Err(e) = hooked {
                    debug!(session = %session.id(), uri = %header.uri, error = %e, "Push rejected");
                    return;
                }
                let Some(handler) = self.push_handler(header.path()) else {
                    debug!(session = %session.id(), uri = %header.uri, "No handler for push");
                    return;
                };
                let session = session.clone();
                tokio::spawn(async move {
                    let uri = header.uri.clone();
                    let mut ctx = RequestCtx::new(session.clone(), header, body);
                    if let Err(e) = handler.handle_push(&mut ctx).await {
                        debug!(session = %session.id(), uri = %uri, error = %e, "Push handler failed");
                    }
                });
            }
        }
    }
}

/// Queue the reply to an inbound call.
fn reply(session: &Session, call: Header, meta: Metadata, body: Vec<u8>, status: Option<Rerror>) {
    let mut header = Header::new(call.seq, MessageType::Reply, call.uri);
    header.meta = meta;
    header.status = status;
    if let Err(e) = session.enqueue(&Message::new(header, body)) {
        debug!(session = %session.id(), error = %e, "Reply dropped");
    }
}

impl EarlyPeer for Peer {
    fn config(&self) -> &PeerConfig {
        &self.config
    }

    fn seq_generator(&self) -> Arc<SeqGenerator> {
        Arc::clone(&self.seqs)
    }

    fn route_call(&self, uri: &str, handler: Arc<dyn CallHandler>) {
        self.router_mut().calls.insert(uri.to_string(), handler);
    }

    fn route_push(&self, uri: &str, handler: Arc<dyn PushHandler>) {
        self.router_mut().pushes.insert(uri.to_string(), handler);
    }

    fn set_unknown_call(&self, handler: Arc<dyn CallHandler>) {
        self.router_mut().unknown_call = Some(handler);
    }

    fn set_unknown_push(&self, handler: Arc<dyn PushHandler>) {
        self.router_mut().unknown_push = Some(handler);
    }
}
