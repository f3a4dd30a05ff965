// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! agnt daemon (agntd)
//!
//! Background process serving the control socket. Typically started by the
//! `agnt` CLI (auto-start) and not invoked directly.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::PathBuf;

use agnt_daemon::lifecycle::{self, Config};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    let mut socket_override: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("agntd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("agntd {}", env!("CARGO_PKG_VERSION"));
                println!("agnt daemon - owns the control socket and dispatches work");
                println!();
                println!("USAGE:");
                println!("    agntd [--socket <path>]");
                println!();
                println!("The daemon is typically started by the `agnt` CLI and should not");
                println!("be invoked directly. It listens on a Unix socket for commands");
                println!("from `agnt` and tool clients.");
                println!();
                println!("OPTIONS:");
                println!("    --socket <path>  Listen on <path> instead of the default");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            "--socket" => {
                let Some(path) = args.next() else {
                    eprintln!("error: --socket requires a path");
                    std::process::exit(2);
                };
                socket_override = Some(PathBuf::from(path));
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: agntd [--socket <path>] [--help | --version]");
                std::process::exit(2);
            }
        }
    }

    let mut config = Config::load()?;
    if let Some(socket) = socket_override {
        config = config.with_socket(socket);
    }

    // Rotate the log if it has grown too large, then write the startup
    // marker (before tracing setup, so clients can find it).
    lifecycle::rotate_log_if_needed(&config.log_path);
    lifecycle::write_startup_marker(&config)?;
    let log_guard = lifecycle::setup_logging(&config)?;

    if let Err(e) = lifecycle::run(config.clone()).await {
        lifecycle::write_startup_error(&config, &e);
        error!("Failed to start daemon: {}", e);
        drop(log_guard);
        eprintln!("agntd: {e}");
        std::process::exit(1);
    }

    Ok(())
}
