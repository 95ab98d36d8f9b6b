//! Configuration for a Ferry peer, loadable from `~/.ferry/config.toml`.
//!
//! Every field has a default, so a partial file (or no file at all) is valid.

use crate::seq::process_name;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors from loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Settings for a single peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Peer name, used to tag generated sequence IDs and in logs.
    pub name: String,
    /// Whether the peer is configured for TLS. Selects `wss` over `ws` for
    /// WebSocket upgrades; the TLS layer itself is provided by the deployment.
    pub tls: bool,
    /// TCP connect timeout in milliseconds.
    pub dial_timeout_ms: u64,
    /// Time allowed for the handshake hooks of a dialed or accepted connection.
    pub handshake_timeout_ms: u64,
    /// Default timeout for outbound calls.
    pub call_timeout_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            name: process_name(),
            tls: false,
            dial_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            call_timeout_ms: 30_000,
        }
    }
}

impl PeerConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret for the HMAC credential handshake. Disabled when unset.
    pub shared_secret: Option<String>,
}

/// WebSocket transport settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Upgrade connections to WebSocket.
    pub enabled: bool,
    /// Request path used for the upgrade handshake.
    pub pattern: String,
}

/// Forwarding settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Backend that receives calls and pushes with no local route.
    pub backend: Option<SocketAddr>,
}

/// Top-level config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub peer: PeerConfig,
    /// Match routes case-insensitively.
    pub ignore_case: bool,
    pub auth: AuthConfig,
    pub websocket: WebSocketConfig,
    pub proxy: ProxyConfig,
}

/// Default config location: `~/.ferry/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ferry")
        .join("config.toml")
}

/// Load the config from `path` (or the default location).
///
/// A missing file yields the defaults. An unreadable or malformed file is an
/// error rather than a silent fallback.
pub fn load_config(path: Option<&Path>) -> Result<FerryConfig, ConfigError> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return Ok(FerryConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: config_path.clone(),
        source,
    })?;
    info!(path = %config_path.display(), "Loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.peer.listen_addr.port(), 9090);
        assert!(!config.ignore_case);
        assert!(config.proxy.backend.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
ignore_case = true

[peer]
name = "gateway"
call_timeout_ms = 1500

[proxy]
backend = "127.0.0.1:9191"

[websocket]
enabled = true
pattern = "/rpc/"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert!(config.ignore_case);
        assert_eq!(config.peer.name, "gateway");
        assert_eq!(config.peer.call_timeout(), Duration::from_millis(1500));
        assert_eq!(config.peer.dial_timeout_ms, 5_000);
        assert_eq!(config.proxy.backend, Some("127.0.0.1:9191".parse().unwrap()));
        assert!(config.websocket.enabled);
        assert_eq!(config.websocket.pattern, "/rpc/");
        assert!(config.auth.shared_secret.is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[peer\nname = ").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
