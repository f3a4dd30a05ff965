// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `agnt session` - session registry commands

use std::path::Path;

use agnt_client::Client;
use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use crate::output::print_json;

#[derive(Args)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Register a session for a project directory
    Register {
        /// Session code; `-` generates `<command>-N`
        code: String,
        /// The session's overlay listener path
        overlay_path: String,
        /// Project directory (defaults to cwd)
        #[arg(long)]
        path: Option<String>,
        /// Command this session runs (used for generated codes)
        #[arg(long, default_value = "session")]
        command: String,
    },
    /// Remove a session
    Unregister { code: String },
    /// Refresh a session's heartbeat
    Heartbeat { code: String },
    /// List sessions
    List {
        /// All projects, not just the current one
        #[arg(long)]
        global: bool,
    },
    /// Show one session
    Get { code: String },
    /// Send text to a session's overlay now
    Send { code: String, message: Vec<String> },
    /// Schedule text for later delivery (e.g. `30m`, `2s`)
    Schedule {
        code: String,
        delay: String,
        message: Vec<String>,
    },
    /// Cancel a scheduled task
    Cancel { task_id: String },
    /// List scheduled tasks
    Tasks {
        /// All projects, not just the current one
        #[arg(long)]
        global: bool,
    },
    /// Find the session owning a directory
    Find { dir: String },
}

pub async fn run(args: SessionArgs, socket: &Path) -> Result<()> {
    match args.command {
        SessionCommand::Register {
            code,
            overlay_path,
            path,
            command,
        } => {
            let project_path = match path {
                Some(path) => path,
                None => std::env::current_dir()?.to_string_lossy().into_owned(),
            };
            let config = json!({
                "project_path": project_path,
                "command": command,
            });
            let client = agnt_client::connect_or_start(socket).await?;
            let session = client
                .cmd("SESSION")
                .args(["REGISTER", &code, &overlay_path])
                .payload_json(&config)?
                .json()
                .await?;
            print_json(&session);

            // Registration binds the session to this connection; a CLI that
            // exits would tear it down again, so hold until interrupted.
            eprintln!("session registered; press Ctrl-C to unregister");
            tokio::signal::ctrl_c().await?;
            Ok(())
        }
        SessionCommand::Unregister { code } => {
            let client = Client::new(socket);
            if let Some(message) = client.cmd("SESSION").args(["UNREGISTER", &code]).ok().await? {
                println!("{message}");
            }
            Ok(())
        }
        SessionCommand::Heartbeat { code } => {
            let client = Client::new(socket);
            client.cmd("SESSION").args(["HEARTBEAT", &code]).ok().await?;
            Ok(())
        }
        SessionCommand::List { global } => {
            let client = Client::new(socket);
            let mut builder = client.cmd("SESSION").arg("LIST");
            if global {
                builder = builder.arg("global");
            }
            print_json(&builder.json().await?);
            Ok(())
        }
        SessionCommand::Get { code } => {
            let client = Client::new(socket);
            print_json(&client.cmd("SESSION").args(["GET", &code]).json().await?);
            Ok(())
        }
        SessionCommand::Send { code, message } => {
            let client = Client::new(socket);
            client
                .cmd("SESSION")
                .args(["SEND", &code])
                .payload(message.join(" ").into_bytes())
                .ok()
                .await?;
            Ok(())
        }
        SessionCommand::Schedule {
            code,
            delay,
            message,
        } => {
            let client = Client::new(socket);
            let task = client
                .cmd("SESSION")
                .args(["SCHEDULE", &code, &delay])
                .payload(message.join(" ").into_bytes())
                .json()
                .await?;
            print_json(&task);
            Ok(())
        }
        SessionCommand::Cancel { task_id } => {
            let client = Client::new(socket);
            print_json(
                &client
                    .cmd("SESSION")
                    .args(["CANCEL", &task_id])
                    .json()
                    .await?,
            );
            Ok(())
        }
        SessionCommand::Tasks { global } => {
            let client = Client::new(socket);
            let mut builder = client.cmd("SESSION").arg("TASKS");
            if global {
                builder = builder.arg("global");
            }
            print_json(&builder.json().await?);
            Ok(())
        }
        SessionCommand::Find { dir } => {
            let client = Client::new(socket);
            print_json(&client.cmd("SESSION").args(["FIND", &dir]).json().await?);
            Ok(())
        }
    }
}
