//! WebSocket transport upgrade.
//!
//! [`WsDial`] upgrades a freshly dialed connection with the WebSocket client
//! handshake; [`WsAccept`] does the server side. After the upgrade every
//! Ferry frame travels as one binary WebSocket message.

use async_trait::async_trait;
use ferry_types::error::{CODE_BAD_MESSAGE, CODE_DIAL_FAILED};
use ferry_types::Rerror;
use ferry_wire::message::MAX_FRAME_SIZE;
use ferry_wire::{
    Plugin, PostAcceptPlugin, PostDialPlugin, PreSession, RawStream, Socket, Transport, WireError,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

const UPGRADE_FAILED: &str = "upgrade to websocket failed";

/// Clean a URL path pattern: leading `/`, no trailing `/`, and the root
/// pattern becomes empty.
pub fn normalize_pattern(pattern: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in pattern.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// WebSocket `(location, origin)` URLs for a connection.
pub fn endpoints(
    tls: bool,
    remote: SocketAddr,
    local: SocketAddr,
    pattern: &str,
) -> (String, String) {
    let scheme = if tls { "wss" } else { "ws" };
    (
        format!("{scheme}://{remote}{pattern}"),
        format!("{scheme}://{local}{pattern}"),
    )
}

fn upgrade_failed(code: i32, cause: impl ToString) -> Rerror {
    Rerror::new(code, UPGRADE_FAILED, cause.to_string())
}

/// Client-side upgrade, run after dial.
#[derive(Debug, Clone)]
pub struct WsDial {
    pattern: String,
}

impl WsDial {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: normalize_pattern(pattern),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Plugin for WsDial {
    fn name(&self) -> &str {
        "websocket"
    }

    fn as_post_dial(&self) -> Option<&dyn PostDialPlugin> {
        Some(self)
    }
}

#[async_trait]
impl PostDialPlugin for WsDial {
    async fn post_dial(&self, sess: &mut PreSession) -> Result<(), Rerror> {
        let (location, origin) = endpoints(
            sess.tls_enabled(),
            sess.remote_addr(),
            sess.local_addr(),
            &self.pattern,
        );
        let mut request = location
            .as_str()
            .into_client_request()
            .map_err(|e| upgrade_failed(CODE_DIAL_FAILED, e))?;
        let origin_value =
            HeaderValue::from_str(&origin).map_err(|e| upgrade_failed(CODE_DIAL_FAILED, e))?;
        request.headers_mut().insert("Origin", origin_value);

        sess.modify_socket(|socket| async move {
            let (ws, _) = tokio_tungstenite::client_async(request, socket)
                .await
                .map_err(|e| upgrade_failed(CODE_DIAL_FAILED, e))?;
            Ok(Box::new(WsTransport::new(ws)) as Box<dyn Transport>)
        })
        .await?;
        debug!(session = %sess.id(), location = %location, "Upgraded to websocket");
        Ok(())
    }
}

/// Server-side upgrade, run after accept.
#[derive(Debug, Clone)]
pub struct WsAccept {
    pattern: String,
}

impl WsAccept {
    /// An empty (or `/`) pattern accepts any request path.
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: normalize_pattern(pattern),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Plugin for WsAccept {
    fn name(&self) -> &str {
        "websocket"
    }

    fn as_post_accept(&self) -> Option<&dyn PostAcceptPlugin> {
        Some(self)
    }
}

#[async_trait]
impl PostAcceptPlugin for WsAccept {
    async fn post_accept(&self, sess: &mut PreSession) -> Result<(), Rerror> {
        let pattern = self.pattern.clone();
        sess.modify_socket(|socket| async move {
            let check_path = move |req: &Request, resp: Response| {
                if pattern.is_empty() || req.uri().path() == pattern {
                    return Ok(resp);
                }
                let mut reject = ErrorResponse::new(Some("not found".to_string()));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            };
            let ws = tokio_tungstenite::accept_hdr_async(socket, check_path)
                .await
                .map_err(|e| upgrade_failed(CODE_BAD_MESSAGE, e))?;
            Ok(Box::new(WsTransport::new(ws)) as Box<dyn Transport>)
        })
        .await?;
        debug!(session = %sess.id(), "Accepted websocket upgrade");
        Ok(())
    }
}

/// Carries one frame per binary WebSocket message.
pub struct WsTransport<S> {
    ws: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl<S: RawStream> Transport for WsTransport<S> {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        loop {
            let frame = match self.ws.next().await {
                None => return Ok(None),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Ping/Pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => return Err(WireError::Transport(e.to_string())),
            };
            if frame.len() > MAX_FRAME_SIZE {
                return Err(WireError::FrameTooLarge {
                    size: frame.len(),
                    max: MAX_FRAME_SIZE,
                });
            }
            return Ok(Some(frame));
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), WireError> {
        self.ws
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| WireError::Transport(e.to_string()))
    }

    fn into_socket(self: Box<Self>) -> Result<Socket, Box<dyn Transport>> {
        Err(self)
    }
}
