//! Handler contexts and handler traits.

use crate::message::{route_path, Header};
use crate::session::Session;
use async_trait::async_trait;
use ferry_types::error::{CODE_BAD_MESSAGE, CODE_INTERNAL_SERVER_ERROR};
use ferry_types::{Metadata, Rerror, META_REAL_IP};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// What header hooks see: the session and the freshly decoded header.
pub struct ReadCtx<'a> {
    session: &'a Session,
    header: &'a mut Header,
}

impl<'a> ReadCtx<'a> {
    pub fn new(session: &'a Session, header: &'a mut Header) -> Self {
        Self { session, header }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn header(&self) -> &Header {
        self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        self.header
    }

    pub fn uri(&self) -> &str {
        &self.header.uri
    }

    /// Route path (URI without the query).
    pub fn path(&self) -> &str {
        self.header.path()
    }

    /// Rewrite the route path; the query string is kept.
    pub fn set_path(&mut self, path: &str) {
        self.header.set_path(path);
    }
}

/// One inbound call or push, as seen by its handler.
pub struct RequestCtx {
    session: Session,
    header: Header,
    body: Vec<u8>,
    reply_meta: Metadata,
}

/// Context passed to call handlers.
pub type CallCtx = RequestCtx;
/// Context passed to push handlers.
pub type PushCtx = RequestCtx;

impl RequestCtx {
    pub fn new(session: Session, header: Header, body: Vec<u8>) -> Self {
        Self {
            session,
            header,
            body,
            reply_meta: Metadata::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sequence of the inbound message.
    pub fn seq(&self) -> &str {
        &self.header.seq
    }

    pub fn uri(&self) -> &str {
        &self.header.uri
    }

    pub fn path(&self) -> &str {
        route_path(&self.header.uri)
    }

    /// Inbound metadata.
    pub fn meta(&self) -> &Metadata {
        &self.header.meta
    }

    pub fn visit_meta(&self, f: impl FnMut(&str, &str)) {
        self.header.meta.visit(f);
    }

    pub fn peek_meta(&self, key: &str) -> Option<&str> {
        self.header.meta.peek(key)
    }

    /// Set metadata on the reply. Pushes have no reply, so this is a no-op
    /// for them in effect.
    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.reply_meta.set(key, value);
    }

    pub fn reply_meta(&self) -> &Metadata {
        &self.reply_meta
    }

    pub(crate) fn take_reply_meta(&mut self) -> Metadata {
        std::mem::take(&mut self.reply_meta)
    }

    /// IP of the directly connected remote end.
    pub fn ip(&self) -> String {
        self.session.remote_addr().ip().to_string()
    }

    /// Originating client IP: the propagated `X-Real-IP` metadata if any,
    /// otherwise [`RequestCtx::ip`].
    pub fn real_ip(&self) -> String {
        self.peek_meta(META_REAL_IP)
            .map(str::to_string)
            .unwrap_or_else(|| self.ip())
    }

    /// Raw body bytes as received.
    pub fn input_body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Move the raw body out, leaving it empty.
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Decode the JSON body.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, Rerror> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Rerror::from_code(CODE_BAD_MESSAGE, e.to_string()))
    }
}

/// Serves calls; returns the raw reply body.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle_call(&self, ctx: &mut CallCtx) -> Result<Vec<u8>, Rerror>;
}

/// Serves pushes.
#[async_trait]
pub trait PushHandler: Send + Sync + 'static {
    async fn handle_push(&self, ctx: &mut PushCtx) -> Result<(), Rerror>;
}

/// Call handler built from an async function over JSON-decoded arguments.
pub struct CallFn<F, A, R> {
    f: F,
    _types: PhantomData<fn(A) -> R>,
}

/// Wrap `f` as a [`CallHandler`]: the body is decoded into `A` and the
/// result encoded from `R`, both as JSON.
pub fn call_fn<A, R, F, Fut>(f: F) -> Arc<dyn CallHandler>
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Rerror>> + Send + 'static,
{
    Arc::new(CallFn {
        f,
        _types: PhantomData,
    })
}

#[async_trait]
impl<A, R, F, Fut> CallHandler for CallFn<F, A, R>
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Rerror>> + Send + 'static,
{
    async fn handle_call(&self, ctx: &mut CallCtx) -> Result<Vec<u8>, Rerror> {
        let arg: A = ctx.bind()?;
        let result = (self.f)(arg).await?;
        serde_json::to_vec(&result)
            .map_err(|e| Rerror::from_code(CODE_INTERNAL_SERVER_ERROR, e.to_string()))
    }
}

/// Push handler built from an async function over a JSON-decoded argument.
pub struct PushFn<F, A> {
    f: F,
    _types: PhantomData<fn(A)>,
}

pub fn push_fn<A, F, Fut>(f: F) -> Arc<dyn PushHandler>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Rerror>> + Send + 'static,
{
    Arc::new(PushFn {
        f,
        _types: PhantomData,
    })
}

#[async_trait]
impl<A, F, Fut> PushHandler for PushFn<F, A>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Rerror>> + Send + 'static,
{
    async fn handle_push(&self, ctx: &mut PushCtx) -> Result<(), Rerror> {
        let arg: A = ctx.bind()?;
        (self.f)(arg).await
    }
}
