//! Ferry base peer — framed RPC sessions with plugin lifecycle hooks.
//!
//! Provides the transport-neutral core the Ferry plugins build on: a peer
//! that listens and dials over TCP, runs plugin hooks around every
//! connection and message, and multiplexes calls, replies and pushes over
//! one session.
//!
//! ## Architecture
//!
//! - **Peer**: Local endpoint; owns plugins, routes and live sessions
//! - **PreSession**: A connection during the handshake (`PostDial`/`PostAccept`)
//! - **Session**: An established connection; issues calls and pushes
//! - **Transport**: Frame-level I/O, swappable during the handshake
//! - **PluginContainer**: Ordered plugins, fired per lifecycle hook

pub mod context;
pub mod error;
pub mod message;
pub mod peer;
pub mod plugin;
pub mod registry;
pub mod session;
pub mod transport;

pub use context::{
    call_fn, push_fn, CallCtx, CallHandler, PushCtx, PushHandler, ReadCtx, RequestCtx,
};
pub use error::WireError;
pub use message::{Header, Message, MessageType};
pub use peer::Peer;
pub use plugin::{
    EarlyPeer, Plugin, PluginContainer, PostAcceptPlugin, PostDialPlugin, PostNewPeerPlugin,
    PostReadCallHeaderPlugin, PostReadPushHeaderPlugin,
};
pub use registry::SessionHub;
pub use session::{CallOptions, CallReply, Early, EarlyDispatch, PreSession, Session};
pub use transport::{LengthPrefixed, RawStream, Socket, Transport};
