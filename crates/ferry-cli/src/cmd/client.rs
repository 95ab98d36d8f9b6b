//! `ferry call` and `ferry push`.

use crate::cli::ConnectArgs;
use ferry_types::{FerryConfig, Rerror};
use ferry_wire::{CallOptions, Peer, Session};
use std::net::SocketAddr;
use std::time::Duration;

pub fn cmd_call(
    config: FerryConfig,
    addr: SocketAddr,
    uri: String,
    body: String,
    conn: ConnectArgs,
    timeout_ms: Option<u64>,
) {
    super::run(call(config, addr, uri, body, conn, timeout_ms));
}

pub fn cmd_push(config: FerryConfig, addr: SocketAddr, uri: String, body: String, conn: ConnectArgs) {
    super::run(push(config, addr, uri, body, conn));
}

async fn call(
    config: FerryConfig,
    addr: SocketAddr,
    uri: String,
    body: String,
    conn: ConnectArgs,
    timeout_ms: Option<u64>,
) -> Result<(), Rerror> {
    let body = super::json_body(&body)?;
    let mut options = options(&conn);
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    let session = connect(config, addr, conn).await?;
    let reply = session.call_raw(&uri, body, options).await;
    session.close();

    for (key, value) in reply.meta.iter() {
        eprintln!("{key}: {value}");
    }
    let result = reply.into_result()?;
    match serde_json::from_slice::<serde_json::Value>(&result) {
        Ok(value) => println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        ),
        Err(_) => println!("{}", String::from_utf8_lossy(&result)),
    }
    Ok(())
}

async fn push(
    config: FerryConfig,
    addr: SocketAddr,
    uri: String,
    body: String,
    conn: ConnectArgs,
) -> Result<(), Rerror> {
    let body = super::json_body(&body)?;
    let options = options(&conn);
    let session = connect(config, addr, conn).await?;
    session.push_raw(&uri, body, options)?;
    // Closing flushes the queued push before the loop exits.
    session.close();
    session.closed().await;
    println!("pushed to {uri}");
    Ok(())
}

fn options(conn: &ConnectArgs) -> CallOptions {
    conn.meta
        .iter()
        .fold(CallOptions::new(), |options, (key, value)| {
            options.with_meta(key.as_str(), value.as_str())
        })
}

async fn connect(config: FerryConfig, addr: SocketAddr, conn: ConnectArgs) -> Result<Session, Rerror> {
    let secret = conn.secret.or_else(|| config.auth.shared_secret.clone());
    let ws = super::ws_pattern(conn.ws, &config);
    let peer = Peer::new(
        config.peer,
        super::dial_plugins(secret.as_deref(), ws.as_deref()),
    )?;
    peer.dial(addr).await
}
