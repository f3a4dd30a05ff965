// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Resolve the control socket path:
/// `AGNT_SOCKET` > `$XDG_RUNTIME_DIR/agnt.sock` > `/tmp/agnt-<uid>.sock`
pub fn socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("AGNT_SOCKET") {
        return PathBuf::from(path);
    }
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime.is_empty() {
            return PathBuf::from(runtime).join("agnt.sock");
        }
    }
    let uid = nix::unistd::getuid();
    PathBuf::from(format!("/tmp/agnt-{uid}.sock"))
}

/// Resolve state directory: `AGNT_STATE_DIR` > `$XDG_STATE_HOME/agnt` > `~/.local/state/agnt`
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("AGNT_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("agnt"));
        }
    }
    let home = dirs::home_dir().ok_or(LifecycleError::NoStateDir)?;
    Ok(home.join(".local/state/agnt"))
}

/// Session heartbeat timeout (default: 60s)
pub fn heartbeat_timeout() -> Duration {
    parse_duration_ms("AGNT_HEARTBEAT_TIMEOUT_MS").unwrap_or(Duration::from_secs(60))
}

/// Interval between heartbeat sweeps (default: 1s)
pub fn heartbeat_check_interval() -> Duration {
    parse_duration_ms("AGNT_HEARTBEAT_CHECK_MS").unwrap_or(Duration::from_secs(1))
}

/// Grace period between SIGTERM and SIGKILL when stopping a process (default: 5s)
pub fn stop_grace() -> Duration {
    parse_duration_ms("AGNT_STOP_GRACE_MS").unwrap_or(Duration::from_secs(5))
}

/// Startup observation window for spawned processes (default: 3s)
pub fn observe_window() -> Duration {
    parse_duration_ms("AGNT_OBSERVE_WINDOW_MS").unwrap_or(Duration::from_secs(3))
}

/// Poll interval inside the observation window (default: 100ms)
pub fn observe_poll() -> Duration {
    parse_duration_ms("AGNT_OBSERVE_POLL_MS").unwrap_or(Duration::from_millis(100))
}

/// Per-stream output ring buffer capacity in bytes (default: 64 KiB)
pub fn ring_capacity() -> usize {
    std::env::var("AGNT_RING_CAPACITY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(64 * 1024)
}

/// Maximum concurrent client connections (default: 64)
pub fn max_clients() -> usize {
    std::env::var("AGNT_MAX_CLIENTS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(64)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
