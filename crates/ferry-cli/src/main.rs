//! Ferry CLI — run peers and talk to them from the terminal.
//!
//! `ferry serve` runs a peer (optionally as a gateway that forwards unknown
//! routes to a backend); `ferry call` and `ferry push` dial a peer, send one
//! message and exit.

mod cli;
mod cmd;

use crate::cli::*;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = match ferry_types::config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve(args) => cmd::serve::cmd_serve(config, args),
        Commands::Call {
            addr,
            uri,
            body,
            conn,
            timeout_ms,
        } => cmd::client::cmd_call(config, addr, uri, body, conn, timeout_ms),
        Commands::Push {
            addr,
            uri,
            body,
            conn,
        } => cmd::client::cmd_push(config, addr, uri, body, conn),
    }
}
