//! Ferry plugins.
//!
//! Each plugin attaches to a [`ferry_wire::Peer`] through the lifecycle hooks
//! in [`ferry_wire::plugin`]; none of them needs support from the peer
//! beyond those hooks.
//!
//! - [`websocket`]: upgrade the connection to WebSocket after dial/accept
//! - [`ignorecase`]: case-insensitive route lookup
//! - [`auth`]: credential check during the handshake
//! - [`proxy`]: forward calls and pushes that have no local route

pub mod auth;
pub mod ignorecase;
pub mod proxy;
pub mod websocket;

pub use auth::{shared_secret, LaunchAuth, VerifyAuth};
pub use ignorecase::IgnoreCase;
pub use proxy::{CallForwarder, Forwarder, Label, Proxy, PushForwarder};
pub use websocket::{WsAccept, WsDial, WsTransport};
