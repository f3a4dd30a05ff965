// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations.

pub mod daemon;
pub mod overlay;
pub mod proc;
pub mod session;
pub mod store;

use std::path::Path;

use agnt_client::Client;
use anyhow::Result;

use crate::output::{print_info, print_json};

/// `agnt ping`
pub async fn ping(socket: &Path) -> Result<()> {
    let client = Client::new(socket);
    client.ping().await?;
    println!("PONG");
    Ok(())
}

/// `agnt info`
pub async fn info(socket: &Path) -> Result<()> {
    let client = Client::new(socket);
    let info = client.info().await?;
    print_info(&info);
    Ok(())
}

/// `agnt detect [dir]`
pub async fn detect(socket: &Path, dir: Option<String>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?.to_string_lossy().into_owned(),
    };
    let client = agnt_client::connect_or_start(socket).await?;
    let detected = client.cmd("DETECT").arg(dir).json().await?;
    print_json(&detected);
    Ok(())
}
