//! Forwarding proxy for unresolved routes.
//!
//! [`Proxy`] installs itself as the peer's unknown-call and/or unknown-push
//! handler. Every request without a local route is labelled (session ID,
//! originating IP, URI), handed to a forwarder chosen by a caller-supplied
//! selector, and re-issued with:
//!
//! - all inbound metadata,
//! - `X-Real-IP` set to the connection's IP when the caller did not send one,
//! - a fresh sequence `<session_id>@<inbound seq>><peer>[<n>]` so the
//!   outbound request can be correlated with the inbound one.
//!
//! Backend errors pass through unchanged except internal-range codes
//! (`[100, 200)`), which become `502 Bad Gateway` with the detail kept.

use async_trait::async_trait;
use ferry_types::error::CODE_NOT_FOUND;
use ferry_types::{Rerror, SeqGenerator, META_REAL_IP};
use ferry_wire::{
    CallCtx, CallHandler, CallOptions, CallReply, EarlyPeer, Plugin, PostNewPeerPlugin, PushCtx,
    PushHandler, RequestCtx, Session,
};
use std::sync::Arc;
use tracing::debug;

/// Who a forwarded request came from and where it was going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub session_id: String,
    pub real_ip: String,
    pub uri: String,
}

/// Something that can carry a forwarded call.
#[async_trait]
pub trait CallForwarder: Send + Sync {
    async fn call(&self, uri: &str, body: Vec<u8>, options: CallOptions) -> CallReply;
}

/// Something that can carry a forwarded push.
#[async_trait]
pub trait PushForwarder: Send + Sync {
    async fn push(&self, uri: &str, body: Vec<u8>, options: CallOptions) -> Result<(), Rerror>;
}

/// A forwarder for both calls and pushes.
pub trait Forwarder: CallForwarder + PushForwarder {
    fn as_call_forwarder(self: Arc<Self>) -> Arc<dyn CallForwarder>;
    fn as_push_forwarder(self: Arc<Self>) -> Arc<dyn PushForwarder>;
}

impl<T: CallForwarder + PushForwarder + 'static> Forwarder for T {
    fn as_call_forwarder(self: Arc<Self>) -> Arc<dyn CallForwarder> {
        self
    }

    fn as_push_forwarder(self: Arc<Self>) -> Arc<dyn PushForwarder> {
        self
    }
}

#[async_trait]
impl CallForwarder for Session {
    async fn call(&self, uri: &str, body: Vec<u8>, options: CallOptions) -> CallReply {
        self.call_raw(uri, body, options).await
    }
}

#[async_trait]
impl PushForwarder for Session {
    async fn push(&self, uri: &str, body: Vec<u8>, options: CallOptions) -> Result<(), Rerror> {
        self.push_raw(uri, body, options)
    }
}

type SelectForwarder = Box<dyn Fn(&Label) -> Arc<dyn Forwarder> + Send + Sync>;
type SelectCall = Box<dyn Fn(&Label) -> Arc<dyn CallForwarder> + Send + Sync>;
type SelectPush = Box<dyn Fn(&Label) -> Arc<dyn PushForwarder> + Send + Sync>;

enum Selector {
    Both(SelectForwarder),
    Call(SelectCall),
    Push(SelectPush),
}

impl Selector {
    fn call_forwarder(&self, label: &Label) -> Option<Arc<dyn CallForwarder>> {
        match self {
            Selector::Both(select) => Some(select(label).as_call_forwarder()),
            Selector::Call(select) => Some(select(label)),
            Selector::Push(_) => None,
        }
    }

    fn push_forwarder(&self, label: &Label) -> Option<Arc<dyn PushForwarder>> {
        match self {
            Selector::Both(select) => Some(select(label).as_push_forwarder()),
            Selector::Push(select) => Some(select(label)),
            Selector::Call(_) => None,
        }
    }

    fn handles_calls(&self) -> bool {
        !matches!(self, Selector::Push(_))
    }

    fn handles_pushes(&self) -> bool {
        !matches!(self, Selector::Call(_))
    }
}

/// The proxy plugin.
pub struct Proxy {
    selector: Arc<Selector>,
}

impl Proxy {
    /// Forward both unknown calls and unknown pushes.
    pub fn new<F>(select: F) -> Self
    where
        F: Fn(&Label) -> Arc<dyn Forwarder> + Send + Sync + 'static,
    {
        Self::with_selector(Selector::Both(Box::new(select)))
    }

    /// Forward unknown calls only.
    pub fn call<F>(select: F) -> Self
    where
        F: Fn(&Label) -> Arc<dyn CallForwarder> + Send + Sync + 'static,
    {
        Self::with_selector(Selector::Call(Box::new(select)))
    }

    /// Forward unknown pushes only.
    pub fn push<F>(select: F) -> Self
    where
        F: Fn(&Label) -> Arc<dyn PushForwarder> + Send + Sync + 'static,
    {
        Self::with_selector(Selector::Push(Box::new(select)))
    }

    fn with_selector(selector: Selector) -> Self {
        Self {
            selector: Arc::new(selector),
        }
    }
}

impl Plugin for Proxy {
    fn name(&self) -> &str {
        "proxy"
    }

    fn as_post_new_peer(&self) -> Option<&dyn PostNewPeerPlugin> {
        Some(self)
    }
}

impl PostNewPeerPlugin for Proxy {
    fn post_new_peer(&self, peer: &dyn EarlyPeer) -> Result<(), Rerror> {
        let engine = Arc::new(Engine {
            selector: Arc::clone(&self.selector),
            seqs: peer.seq_generator(),
        });
        if self.selector.handles_calls() {
            peer.set_unknown_call(engine.clone());
        }
        if self.selector.handles_pushes() {
            peer.set_unknown_push(engine);
        }
        Ok(())
    }
}

/// The unknown-route handler installed by [`Proxy`].
struct Engine {
    selector: Arc<Selector>,
    seqs: Arc<SeqGenerator>,
}

impl Engine {
    fn prepare(&self, ctx: &RequestCtx) -> (Label, CallOptions) {
        let session_id = ctx.session().id().to_string();
        let prefix = format!("{session_id}@{}", ctx.seq());
        let mut options = CallOptions::new().with_seq(self.seqs.next(&[prefix.as_str()]));
        options.meta = ctx.meta().clone();

        let real_ip = match ctx.peek_meta(META_REAL_IP) {
            Some(ip) => ip.to_string(),
            None => {
                let ip = ctx.ip();
                options.meta.set(META_REAL_IP, ip.clone());
                ip
            }
        };
        let label = Label {
            session_id,
            real_ip,
            uri: ctx.uri().to_string(),
        };
        (label, options)
    }
}

#[async_trait]
impl CallHandler for Engine {
    async fn handle_call(&self, ctx: &mut CallCtx) -> Result<Vec<u8>, Rerror> {
        let (label, options) = self.prepare(ctx);
        let forwarder = self
            .selector
            .call_forwarder(&label)
            .ok_or_else(|| Rerror::from_code(CODE_NOT_FOUND, label.uri.clone()))?;
        debug!(
            session = %label.session_id,
            uri = %label.uri,
            seq = ?options.seq,
            "Forwarding call"
        );

        let reply = forwarder.call(&label.uri, ctx.take_body(), options).await;
        reply.meta.visit(|key, value| ctx.set_meta(key, value));
        match reply.error {
            Some(err) => Err(err.into_gateway()),
            None => Ok(reply.body),
        }
    }
}

#[async_trait]
impl PushHandler for Engine {
    async fn handle_push(&self, ctx: &mut PushCtx) -> Result<(), Rerror> {
        let (label, options) = self.prepare(ctx);
        let forwarder = self
            .selector
            .push_forwarder(&label)
            .ok_or_else(|| Rerror::from_code(CODE_NOT_FOUND, label.uri.clone()))?;
        debug!(
            session = %label.session_id,
            uri = %label.uri,
            seq = ?options.seq,
            "Forwarding push"
        );

        forwarder
            .push(&label.uri, ctx.take_body(), options)
            .await
            .map_err(Rerror::into_gateway)
    }
}
