// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `agnt overlay` - overlay endpoint commands

use std::path::Path;

use agnt_client::Client;
use anyhow::Result;
use clap::{Args, Subcommand};

use crate::output::print_json;

#[derive(Args)]
pub struct OverlayArgs {
    #[command(subcommand)]
    pub command: OverlayCommand,
}

#[derive(Subcommand)]
pub enum OverlayCommand {
    /// Set the process-wide overlay endpoint
    Set { endpoint: String },
    /// Show the current endpoint
    Get,
    /// Clear the endpoint
    Clear,
    /// Record overlay activity
    Activity,
}

pub async fn run(args: OverlayArgs, socket: &Path) -> Result<()> {
    let client = Client::new(socket);
    match args.command {
        OverlayCommand::Set { endpoint } => {
            client.cmd("OVERLAY").args(["SET", &endpoint]).ok().await?;
        }
        OverlayCommand::Get => {
            print_json(&client.cmd("OVERLAY").arg("GET").json().await?);
        }
        OverlayCommand::Clear => {
            client.cmd("OVERLAY").arg("CLEAR").ok().await?;
        }
        OverlayCommand::Activity => {
            client.cmd("OVERLAY").arg("ACTIVITY").ok().await?;
        }
    }
    Ok(())
}
