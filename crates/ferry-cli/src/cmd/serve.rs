//! `ferry serve`: a peer with the built-in routes, optionally a gateway.

use crate::cli::ServeArgs;
use ferry_plugins::{shared_secret, Forwarder, IgnoreCase, Label, Proxy, WsAccept};
use ferry_types::error::CODE_INTERNAL_SERVER_ERROR;
use ferry_types::{FerryConfig, PeerConfig, Rerror};
use ferry_wire::{Peer, Plugin};
use std::sync::Arc;
use tracing::info;

pub fn cmd_serve(config: FerryConfig, args: ServeArgs) {
    super::run(serve(config, args));
}

async fn serve(mut config: FerryConfig, args: ServeArgs) -> Result<(), Rerror> {
    if let Some(listen) = args.listen {
        config.peer.listen_addr = listen;
    }
    let ignore_case = args.ignore_case || config.ignore_case;
    let secret = args.secret.or_else(|| config.auth.shared_secret.clone());
    let ws = super::ws_pattern(args.ws, &config);
    let backend = args.proxy_to.or(config.proxy.backend);

    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    if let Some(pattern) = &ws {
        plugins.push(Arc::new(WsAccept::new(pattern)));
    }
    if let Some(secret) = &secret {
        let (_, verify) = shared_secret(secret.as_str());
        plugins.push(Arc::new(verify));
    }
    if ignore_case {
        plugins.push(Arc::new(IgnoreCase::new()));
    }
    if let Some(backend) = backend {
        let dialer = Peer::new(
            PeerConfig {
                name: format!("{}-upstream", config.peer.name),
                ..config.peer.clone()
            },
            super::dial_plugins(secret.as_deref(), ws.as_deref()),
        )?;
        let upstream = dialer.dial(backend).await?;
        info!(backend = %backend, session = %upstream.id(), "Connected to backend");
        plugins.push(Arc::new(Proxy::new(move |_label: &Label| {
            Arc::new(upstream.clone()) as Arc<dyn Forwarder>
        })));
    }

    let peer = Peer::new(config.peer.clone(), plugins)?;
    peer.route_call_fn("/echo", |body: serde_json::Value| async move {
        Ok::<_, Rerror>(body)
    });
    peer.route_push_fn("/log", |body: serde_json::Value| async move {
        info!(%body, "Push received");
        Ok(())
    });

    tokio::select! {
        served = peer.listen_and_serve() => served?,
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| Rerror::from_code(CODE_INTERNAL_SERVER_ERROR, e.to_string()))?;
            info!("Shutting down");
            peer.close();
        }
    }
    Ok(())
}
