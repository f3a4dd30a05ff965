// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port bookkeeping and conflict detection.
//!
//! The port table maps listening ports to the managed PIDs that own them,
//! so conflict recovery can tell "our" listeners from foreign ones. Port
//! hints are extracted from command lines, and EADDRINUSE-shaped failures
//! are recognised in accumulated stderr.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

/// Transient `port -> pid` table for managed processes.
#[derive(Debug, Default)]
pub struct PortTable {
    ports: Mutex<HashMap<u16, u32>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, port: u16, pid: u32) {
        self.ports.lock().insert(port, pid);
    }

    /// The managed PID listening on a port, if any.
    pub fn owner(&self, port: u16) -> Option<u32> {
        self.ports.lock().get(&port).copied()
    }

    /// True when this exact (port, pid) pair is managed by us.
    pub fn is_ours(&self, port: u16, pid: u32) -> bool {
        self.owner(port) == Some(pid)
    }

    /// Drop every port owned by a PID (on process exit).
    pub fn remove_pid(&self, pid: u32) {
        self.ports.lock().retain(|_, owner| *owner != pid);
    }

    pub fn len(&self) -> usize {
        self.ports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.lock().is_empty()
    }
}

static PORT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:^|\s)-p\s+(\d{1,5})(?:\s|$)",
        r"(?:^|\s)--port[=\s](\d{1,5})(?:\s|$)",
        r"(?:^|\s)PORT=(\d{1,5})(?:\s|$)",
        r"(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d{1,5})",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Extract an expected-port hint from a command line.
///
/// Recognises `-p 3000`, `--port 3000`, `--port=3000`, `PORT=3000`,
/// `localhost:3000`, `127.0.0.1:3000`, and `0.0.0.0:3000`.
pub fn extract_port(command: &str, args: &[String]) -> Option<u16> {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    scan_port(&line)
}

fn scan_port(text: &str) -> Option<u16> {
    for pattern in PORT_PATTERNS.iter() {
        if let Some(port) = pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .filter(|p| *p > 0)
        {
            return Some(port);
        }
    }
    None
}

static EADDRINUSE_PRESENT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"EADDRINUSE",
        r"(?i)address already in use",
        r"(?i)port\s+\d{1,5}\s+is already in use",
        r"(?i)bind(?:\(\))?[:\s].*in use",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static EADDRINUSE_PORT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"EADDRINUSE[^\d]*:{1,3}(\d{1,5})",
        r"(?i)port\s+(\d{1,5})",
        r"(?i)(?:address already in use)[^\d]*:{1,3}(\d{1,5})",
        r"(?:localhost|127\.0\.0\.1|0\.0\.0\.0|::):{1,2}(\d{1,5})",
        r":(\d{2,5})(?:\D|$)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Scan stderr for an address-in-use failure.
///
/// Returns `Some(port)` when the conflicting port could be extracted,
/// `Some(None)` when the failure shape matched without a port.
pub fn scan_addr_in_use(stderr: &str) -> Option<Option<u16>> {
    if !EADDRINUSE_PRESENT.iter().any(|re| re.is_match(stderr)) {
        return None;
    }
    for pattern in EADDRINUSE_PORT.iter() {
        if let Some(port) = pattern
            .captures(stderr)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .filter(|p| *p > 0)
        {
            return Some(Some(port));
        }
    }
    Some(None)
}

/// Timeout for `lsof` listener discovery.
const LSOF_TIMEOUT: Duration = Duration::from_secs(5);

/// PIDs of every OS process listening on a TCP port.
///
/// Shells out to `lsof`; an absent or failing `lsof` yields an empty list
/// (conflict recovery then degrades to the plain retry).
pub async fn listeners_on_port(port: u16) -> Vec<u32> {
    let mut cmd = Command::new("lsof");
    cmd.args(["-ti", &format!("tcp:{port}"), "-sTCP:LISTEN"])
        .stdin(std::process::Stdio::null());

    let output = match tokio::time::timeout(LSOF_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(error = %e, port, "lsof failed");
            return Vec::new();
        }
        Err(_) => {
            debug!(port, "lsof timed out");
            return Vec::new();
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
