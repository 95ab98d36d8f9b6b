//! Clap CLI definitions for Ferry.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  ferry serve --listen 127.0.0.1:9090            Serve the built-in /echo and /log routes
  ferry serve --ignore-case --secret s3cret      Case-insensitive routes behind a shared secret
  ferry serve --listen 0.0.0.0:8080 --proxy-to 10.0.0.5:9090
                                                 Gateway: forward unknown routes to a backend
  ferry call 127.0.0.1:9090 /echo '{\"a\":1}'      Call a route and print the reply
  ferry push 127.0.0.1:9090 /log '\"hello\"'       Push a message";

/// Ferry — RPC peer with a plugin pipeline and a forwarding proxy.
#[derive(Parser)]
#[command(name = "ferry", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.ferry/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a peer until Ctrl+C.
    Serve(ServeArgs),
    /// Call a route on a remote peer and print the reply body.
    Call {
        /// Remote peer address.
        addr: SocketAddr,
        /// Route URI, e.g. /echo or /users/get?id=7.
        uri: String,
        /// JSON argument.
        #[arg(default_value = "null")]
        body: String,
        #[command(flatten)]
        conn: ConnectArgs,
        /// Call timeout in milliseconds (default: from config).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Push a message to a route on a remote peer.
    Push {
        /// Remote peer address.
        addr: SocketAddr,
        /// Route URI.
        uri: String,
        /// JSON argument.
        #[arg(default_value = "null")]
        body: String,
        #[command(flatten)]
        conn: ConnectArgs,
    },
}

#[derive(Args)]
pub struct ServeArgs {
    /// Listen address (overrides config).
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    /// Match routes case-insensitively.
    #[arg(long)]
    pub ignore_case: bool,
    /// Require the shared-secret handshake from clients.
    #[arg(long)]
    pub secret: Option<String>,
    /// Accept WebSocket connections on this path.
    #[arg(long)]
    pub ws: Option<String>,
    /// Forward calls and pushes without a local route to this backend.
    #[arg(long)]
    pub proxy_to: Option<SocketAddr>,
}

/// Options shared by the client commands.
#[derive(Args)]
pub struct ConnectArgs {
    /// Shared secret for the handshake.
    #[arg(long)]
    pub secret: Option<String>,
    /// Upgrade to WebSocket on this path.
    #[arg(long)]
    pub ws: Option<String>,
    /// Metadata to send, as key=value (repeatable).
    #[arg(long = "meta", value_parser = parse_meta)]
    pub meta: Vec<(String, String)>,
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("trace=a=b").unwrap(),
            ("trace".to_string(), "a=b".to_string())
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }

    #[test]
    fn test_parse_call() {
        let cli = Cli::parse_from([
            "ferry",
            "call",
            "127.0.0.1:9090",
            "/echo",
            "[1,2]",
            "--meta",
            "k=v",
            "--timeout-ms",
            "250",
        ]);
        match cli.command {
            Commands::Call {
                addr,
                uri,
                body,
                conn,
                timeout_ms,
            } => {
                assert_eq!(addr.port(), 9090);
                assert_eq!(uri, "/echo");
                assert_eq!(body, "[1,2]");
                assert_eq!(conn.meta, vec![("k".to_string(), "v".to_string())]);
                assert_eq!(timeout_ms, Some(250));
            }
            _ => panic!("expected call"),
        }
    }
}
