// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `agnt run` and `agnt proc` - managed process commands

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use crate::output::print_json;

#[derive(Args)]
pub struct RunArgs {
    /// Process id, unique per project
    #[arg(long)]
    pub id: String,

    /// Project directory that owns the process (defaults to cwd)
    #[arg(long)]
    pub path: Option<String>,

    /// Wait for the process to exit instead of returning immediately
    #[arg(long)]
    pub foreground: bool,

    /// Port the process is expected to bind (conflict pre-emption hint)
    #[arg(long)]
    pub port: Option<u16>,

    /// Environment variables (KEY=VALUE, repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Command and its arguments
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

pub async fn run_command(args: RunArgs, socket: &Path) -> Result<()> {
    let mut command = args.command.into_iter();
    let Some(program) = command.next() else {
        bail!("missing command");
    };

    let mut env = HashMap::new();
    for pair in &args.env {
        match pair.split_once('=') {
            Some((key, value)) => {
                env.insert(key.to_string(), value.to_string());
            }
            None => bail!("invalid --env '{pair}', expected KEY=VALUE"),
        }
    }

    let project_path = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?.to_string_lossy().into_owned(),
    };

    let request = json!({
        "id": args.id,
        "project_path": project_path,
        "command": program,
        "args": command.collect::<Vec<String>>(),
        "env": env,
        "expected_port": args.port,
        "mode": if args.foreground { "foreground" } else { "background" },
    });

    let client = agnt_client::connect_or_start(socket).await?;
    let outcome = client
        .cmd("RUN-JSON")
        .payload_json(&request)?
        .json()
        .await?;
    print_json(&outcome);
    Ok(())
}

#[derive(Args)]
pub struct ProcArgs {
    #[command(subcommand)]
    pub command: ProcCommand,
}

#[derive(Subcommand)]
pub enum ProcCommand {
    /// Show one process
    Status { id: String },
    /// Print captured output
    Output {
        id: String,
        /// Stream: stdout, stderr, or combined
        #[arg(default_value = "combined")]
        stream: String,
    },
    /// Stop a process
    Stop {
        id: String,
        /// Skip the graceful TERM grace period
        #[arg(long)]
        force: bool,
    },
    /// List all managed processes
    List,
    /// Kill foreign listeners on a port
    CleanupPort { port: u64 },
}

pub async fn proc_command(args: ProcArgs, socket: &Path) -> Result<()> {
    let client = agnt_client::Client::new(socket);
    match args.command {
        ProcCommand::Status { id } => {
            let status = client.cmd("PROC").args(["STATUS", &id]).json().await?;
            print_json(&status);
        }
        ProcCommand::Output { id, stream } => {
            let chunks = client
                .cmd("PROC")
                .args(["OUTPUT", &id, &stream])
                .chunked()
                .await?;
            let mut stdout = std::io::stdout().lock();
            for chunk in chunks {
                use std::io::Write;
                stdout.write_all(&chunk)?;
            }
        }
        ProcCommand::Stop { id, force } => {
            let mut builder = client.cmd("PROC").args(["STOP", &id]);
            if force {
                builder = builder.arg("force");
            }
            let stopped = builder.json().await?;
            print_json(&stopped);
        }
        ProcCommand::List => {
            let listed = client.cmd("PROC").arg("LIST").json().await?;
            print_json(&listed);
        }
        ProcCommand::CleanupPort { port } => {
            let result = client
                .cmd("PROC")
                .args(["CLEANUP-PORT", &port.to_string()])
                .json()
                .await?;
            print_json(&result);
        }
    }
    Ok(())
}
