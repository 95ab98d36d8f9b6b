//! Core types shared by every Ferry crate.
//!
//! - [`Rerror`]: the structured error that travels on the wire, plus the
//!   status code table.
//! - [`Metadata`]: per-message key/value pairs.
//! - [`SeqGenerator`]: correlation sequence IDs for forwarded requests.
//! - [`config`]: peer configuration and TOML loading.

pub mod config;
pub mod error;
pub mod meta;
pub mod seq;

pub use config::{FerryConfig, PeerConfig};
pub use error::{code_text, Rerror};
pub use meta::{Metadata, META_REAL_IP};
pub use seq::SeqGenerator;
