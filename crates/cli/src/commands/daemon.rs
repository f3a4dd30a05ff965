// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `agnt daemon` - daemon lifecycle commands

use std::path::Path;

use agnt_client::{Client, ClientError};
use agnt_daemon::lifecycle::{self, Config};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::output::print_info;

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
    /// Terminate wedged daemon processes by scanning the process table
    Cleanup,
}

pub async fn run(args: DaemonArgs, socket: &Path) -> Result<()> {
    match args.command {
        DaemonCommand::Start => start(socket).await,
        DaemonCommand::Stop => stop(socket).await,
        DaemonCommand::Status => status(socket).await,
        DaemonCommand::Cleanup => cleanup(),
    }
}

/// Last-resort cleanup for daemons that stopped answering their socket.
fn cleanup() -> Result<()> {
    let killed =
        agnt_daemon::socket::cleanup_matching_processes(|comm| comm == "agntd", "agnt")?;
    if killed.is_empty() {
        println!("no matching daemon processes");
    } else {
        for pid in killed {
            println!("terminated {pid}");
        }
    }
    Ok(())
}

/// Run the daemon in the foreground (used directly and via auto-start).
async fn start(socket: &Path) -> Result<()> {
    let config = Config::load()
        .context("could not resolve state directory")?
        .with_socket(socket.to_path_buf());

    lifecycle::rotate_log_if_needed(&config.log_path);
    lifecycle::write_startup_marker(&config)?;
    let _log_guard = lifecycle::setup_logging(&config)?;

    if let Err(e) = lifecycle::run(config.clone()).await {
        lifecycle::write_startup_error(&config, &e);
        return Err(e.into());
    }
    Ok(())
}

async fn stop(socket: &Path) -> Result<()> {
    let client = Client::new(socket);
    match client.shutdown().await {
        Ok(()) => {
            println!("daemon stopping");
            Ok(())
        }
        Err(ClientError::SocketNotFound(_)) => {
            println!("daemon not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn status(socket: &Path) -> Result<()> {
    let client = Client::new(socket);
    match client.info().await {
        Ok(info) => {
            print_info(&info);
            Ok(())
        }
        Err(ClientError::SocketNotFound(_)) | Err(ClientError::Io(_)) => {
            println!("daemon not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
