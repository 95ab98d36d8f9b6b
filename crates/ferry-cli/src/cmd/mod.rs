//! Command implementations.

pub mod client;
pub mod serve;

use ferry_plugins::{shared_secret, WsDial};
use ferry_types::error::CODE_BAD_MESSAGE;
use ferry_types::{FerryConfig, Rerror};
use ferry_wire::Plugin;
use std::future::Future;
use std::sync::Arc;

/// Plugins for the dialing side of a connection, in handshake order.
pub fn dial_plugins(secret: Option<&str>, ws: Option<&str>) -> Vec<Arc<dyn Plugin>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    if let Some(pattern) = ws {
        plugins.push(Arc::new(WsDial::new(pattern)));
    }
    if let Some(secret) = secret {
        let (launch, _) = shared_secret(secret);
        plugins.push(Arc::new(launch));
    }
    plugins
}

/// WebSocket pattern from the flag, else from the config when enabled.
pub fn ws_pattern(flag: Option<String>, config: &FerryConfig) -> Option<String> {
    flag.or_else(|| {
        config
            .websocket
            .enabled
            .then(|| config.websocket.pattern.clone())
    })
}

/// Validate a JSON argument and return its bytes.
pub fn json_body(body: &str) -> Result<Vec<u8>, Rerror> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Rerror::new(CODE_BAD_MESSAGE, "invalid JSON argument", e.to_string()))?;
    serde_json::to_vec(&value)
        .map_err(|e| Rerror::new(CODE_BAD_MESSAGE, "invalid JSON argument", e.to_string()))
}

/// Run `fut` on a fresh runtime; print the error and exit non-zero on failure.
pub fn run<F>(fut: F)
where
    F: Future<Output = Result<(), Rerror>>,
{
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(fut) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
