// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon auto-start: launch `agntd` when no listener is present.
//!
//! The daemon binary is found as a sibling of the current executable;
//! failing that, the current executable itself is re-invoked with
//! `daemon start`. Startup failures are surfaced from the daemon log so the
//! user sees the real reason instead of a bare timeout.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{Client, ClientError};

/// Timeout for waiting for the daemon socket to appear.
pub fn timeout_connect() -> Duration {
    parse_duration_ms("AGNT_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Polling interval for connection retries.
pub fn poll_interval() -> Duration {
    parse_duration_ms("AGNT_CONNECT_POLL_MS").unwrap_or(Duration::from_millis(50))
}

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Find the daemon executable: `AGNT_DAEMON_BIN` override, a sibling
/// `agntd` next to the current executable, else the current executable
/// itself (re-invoked with `daemon start`).
pub fn find_daemon_binary() -> (PathBuf, Vec<String>) {
    if let Ok(path) = std::env::var("AGNT_DAEMON_BIN") {
        return (PathBuf::from(path), Vec::new());
    }

    let current_exe = std::env::current_exe().ok();
    if let Some(exe) = &current_exe {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("agntd");
            if sibling.exists() {
                return (sibling, Vec::new());
            }
        }
    }

    match current_exe {
        Some(exe) => (exe, vec!["daemon".to_string(), "start".to_string()]),
        None => (PathBuf::from("agntd"), Vec::new()),
    }
}

/// Spawn the daemon in the background, detached from our stdio.
pub fn start_daemon_background(socket: Option<&Path>) -> Result<Child, ClientError> {
    let (binary, mut args) = find_daemon_binary();
    if let Some(socket) = socket {
        args.push("--socket".to_string());
        args.push(socket.to_string_lossy().into_owned());
    }

    debug!(binary = %binary.display(), ?args, "starting daemon");
    Command::new(&binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ClientError::DaemonStartFailed(format!("{}: {e}", binary.display())))
}

/// Read the daemon log from the last startup marker, looking for errors.
pub fn read_startup_error() -> Option<String> {
    let config = agnt_daemon::Config::load().ok()?;
    let content = std::fs::read_to_string(&config.log_path).ok()?;
    parse_startup_error(&content)
}

/// Parse startup errors from log content (pure logic, no I/O).
fn parse_startup_error(content: &str) -> Option<String> {
    let start_pos = content.rfind(agnt_daemon::lifecycle::STARTUP_MARKER_PREFIX)?;
    let startup_log = &content[start_pos..];

    let errors: Vec<&str> = startup_log
        .lines()
        .filter(|line| line.contains("ERROR") || line.contains("Failed to start"))
        .collect();
    if errors.is_empty() {
        return None;
    }

    let messages: Vec<String> = errors
        .iter()
        .filter_map(|line| line.split_once(": ").map(|(_, msg)| msg.to_string()))
        .collect();
    if messages.is_empty() {
        Some(errors.join("\n"))
    } else {
        Some(messages.join("\n"))
    }
}

fn wrap_with_startup_error(err: ClientError) -> ClientError {
    if matches!(err, ClientError::DaemonStartFailed(_)) {
        return err;
    }
    match read_startup_error() {
        Some(startup_error) => ClientError::DaemonStartFailed(startup_error),
        None => err,
    }
}

/// Connect to the daemon at `socket_path`, starting it if absent.
///
/// Retries the connect until [`timeout_connect`] elapses, watching the
/// spawned child for an early exit (startup failure).
pub async fn connect_or_start(socket_path: impl Into<PathBuf>) -> Result<Client, ClientError> {
    let socket_path = socket_path.into();
    let client = Client::new(&socket_path);

    match client.ping().await {
        Ok(()) => return Ok(client),
        Err(ClientError::SocketNotFound(_)) => {}
        Err(ClientError::Io(_)) | Err(ClientError::Protocol(_)) => {
            // Stale socket: nothing accepting. The daemon's own takeover
            // logic reclaims it once a fresh instance binds.
            debug!("stale socket, starting fresh daemon");
        }
        Err(e) => return Err(e),
    }

    let child = start_daemon_background(Some(&socket_path))?;
    connect_with_retry(socket_path, timeout_connect(), child).await
}

async fn connect_with_retry(
    socket_path: PathBuf,
    timeout: Duration,
    mut child: Child,
) -> Result<Client, ClientError> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        // A child that exited early failed to start; surface its log error.
        if let Ok(Some(status)) = child.try_wait() {
            return Err(match read_startup_error() {
                Some(err) => ClientError::DaemonStartFailed(err),
                None => ClientError::DaemonStartFailed(format!("exited with {status}")),
            });
        }

        let client = Client::new(&socket_path);
        match client.ping().await {
            Ok(()) => return Ok(client),
            Err(ClientError::SocketNotFound(_)) | Err(ClientError::Io(_)) => {
                tokio::time::sleep(poll_interval()).await;
            }
            Err(e) => return Err(wrap_with_startup_error(e)),
        }
    }

    Err(wrap_with_startup_error(ClientError::DaemonStartTimeout))
}

#[cfg(test)]
#[path = "auto_start_tests.rs"]
mod tests;
