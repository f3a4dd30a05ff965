// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `agnt store` - project-scoped key/value commands

use std::path::Path;

use agnt_client::Client;
use anyhow::Result;
use clap::{Args, Subcommand};

use crate::output::print_json;

#[derive(Args)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand)]
pub enum StoreCommand {
    /// Read one key
    Get { key: String },
    /// Write one key (value parsed as JSON, else stored as a string)
    Set { key: String, value: String },
    /// Delete one key
    Delete { key: String },
    /// List keys in the current project's bucket
    List,
    /// Remove the current project's bucket
    Clear,
    /// Dump the current project's bucket
    GetAll,
}

pub async fn run(args: StoreArgs, socket: &Path) -> Result<()> {
    let client = Client::new(socket);
    match args.command {
        StoreCommand::Get { key } => {
            print_json(&client.cmd("STORE").args(["GET", &key]).json().await?);
        }
        StoreCommand::Set { key, value } => {
            let payload: serde_json::Value = serde_json::from_str(&value)
                .unwrap_or(serde_json::Value::String(value));
            client
                .cmd("STORE")
                .args(["SET", &key])
                .payload_json(&payload)?
                .ok()
                .await?;
        }
        StoreCommand::Delete { key } => {
            client.cmd("STORE").args(["DELETE", &key]).ok().await?;
        }
        StoreCommand::List => {
            print_json(&client.cmd("STORE").arg("LIST").json().await?);
        }
        StoreCommand::Clear => {
            print_json(&client.cmd("STORE").arg("CLEAR").json().await?);
        }
        StoreCommand::GetAll => {
            print_json(&client.cmd("STORE").arg("GET-ALL").json().await?);
        }
    }
    Ok(())
}
