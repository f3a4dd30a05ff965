// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! agnt - workstation orchestration CLI

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::{daemon, proc, session};

#[derive(Parser)]
#[command(
    name = "agnt",
    version = concat!("v", env!("CARGO_PKG_VERSION")),
    about = "agnt - dev workstation orchestration"
)]
struct Cli {
    /// Socket path override (defaults to the per-user daemon socket)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon management
    Daemon(daemon::DaemonArgs),
    /// Check that the daemon answers
    Ping,
    /// Show daemon version, uptime, and counters
    Info,
    /// Detect project type and scripts for a directory
    Detect {
        /// Directory to inspect (defaults to the current directory)
        dir: Option<String>,
    },
    /// Start (or reuse) a managed process
    Run(proc::RunArgs),
    /// Managed process operations
    Proc(proc::ProcArgs),
    /// Session operations
    Session(session::SessionArgs),
    /// Overlay endpoint operations
    Overlay(commands::overlay::OverlayArgs),
    /// Project-scoped key/value store
    Store(commands::store::StoreArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let socket = cli
        .socket
        .unwrap_or_else(agnt_daemon::env::socket_path);

    let result = match cli.command {
        Commands::Daemon(args) => daemon::run(args, &socket).await,
        Commands::Ping => commands::ping(&socket).await,
        Commands::Info => commands::info(&socket).await,
        Commands::Detect { dir } => commands::detect(&socket, dir).await,
        Commands::Run(args) => proc::run_command(args, &socket).await,
        Commands::Proc(args) => proc::proc_command(args, &socket).await,
        Commands::Session(args) => session::run(args, &socket).await,
        Commands::Overlay(args) => commands::overlay::run(args, &socket).await,
        Commands::Store(args) => commands::store::run(args, &socket).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
