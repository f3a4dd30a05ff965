// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket lifecycle: bind, connect, and single-instance takeover.
//!
//! The daemon owns exactly one Unix socket. Binding goes through a liveness
//! probe so that a crashed daemon's stale socket file is reclaimed while a
//! healthy daemon keeps exclusive ownership. A sibling `<path>.pid` file
//! records the owner and a `<path>.upgrade.lock` file gates concurrent
//! takeover attempts.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Timeout for the liveness probe against an existing socket.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Upgrade locks older than this are presumed dead and reclaimed.
pub const UPGRADE_LOCK_STALE: Duration = Duration::from_secs(5 * 60);

/// Socket manager errors
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("No daemon socket at {0}")]
    NotFound(PathBuf),

    #[error("Daemon already running at {0}")]
    DaemonRunning(PathBuf),

    #[error("Another upgrade is in progress ({0})")]
    UpgradeInProgress(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind the control socket, guaranteeing single-instance semantics.
///
/// If the socket path exists, a short probe `connect()` decides between a
/// live peer (fail with [`SocketError::DaemonRunning`]) and a stale file
/// (unlink and take over). The bound socket is chmod'd `0600`; filesystem
/// permissions are the only access control on this transport.
pub async fn listen(path: &Path) -> Result<UnixListener, SocketError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        match tokio::time::timeout(PROBE_TIMEOUT, UnixStream::connect(path)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                return Err(SocketError::DaemonRunning(path.to_path_buf()));
            }
            Ok(Err(e)) => {
                debug!(error = %e, "socket probe failed, treating as stale");
            }
            Err(_) => {
                debug!("socket probe timed out, treating as stale");
            }
        }

        // Stale socket: gate the takeover on the upgrade lock so two
        // concurrent starters don't both unlink and bind.
        let _upgrade = UpgradeLock::acquire(path)?;
        if path.exists() {
            fs::remove_file(path)?;
            info!(path = %path.display(), "removed stale socket");
        }
        return bind_and_restrict(path);
    }

    bind_and_restrict(path)
}

fn bind_and_restrict(path: &Path) -> Result<UnixListener, SocketError> {
    let listener = UnixListener::bind(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

/// Connect to an existing daemon socket.
pub async fn connect(path: &Path) -> Result<UnixStream, SocketError> {
    if !path.exists() {
        return Err(SocketError::NotFound(path.to_path_buf()));
    }
    Ok(UnixStream::connect(path).await?)
}

/// Sibling PID file path for a socket.
pub fn pid_file_path(socket: &Path) -> PathBuf {
    sibling(socket, "pid")
}

fn upgrade_lock_path(socket: &Path) -> PathBuf {
    sibling(socket, "upgrade.lock")
}

fn sibling(socket: &Path, suffix: &str) -> PathBuf {
    let mut name = socket.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    socket.with_file_name(name)
}

/// Write the sibling PID file atomically (temp + rename).
pub fn write_pid_file(socket: &Path, pid: u32) -> Result<(), SocketError> {
    let path = pid_file_path(socket);
    let tmp = path.with_extension("pid.tmp");
    fs::write(&tmp, format!("{pid}\n"))?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Read the PID from the sibling PID file, if present and parseable.
pub fn read_pid_file(socket: &Path) -> Option<u32> {
    fs::read_to_string(pid_file_path(socket))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Remove socket and PID files. Best-effort, used on shutdown.
pub fn remove_runtime_files(socket: &Path) {
    if socket.exists() {
        if let Err(e) = fs::remove_file(socket) {
            warn!(error = %e, "failed to remove socket file");
        }
    }
    let pid = pid_file_path(socket);
    if pid.exists() {
        if let Err(e) = fs::remove_file(&pid) {
            warn!(error = %e, "failed to remove PID file");
        }
    }
}

/// Exclusive takeover gate, held for the duration of a socket takeover.
///
/// The lock is the existence of the file; a crashed upgrader leaves it
/// behind, so locks older than [`UPGRADE_LOCK_STALE`] are reclaimed.
#[derive(Debug)]
pub struct UpgradeLock {
    path: PathBuf,
}

impl UpgradeLock {
    /// Acquire the upgrade lock for a socket path.
    pub fn acquire(socket: &Path) -> Result<Self, SocketError> {
        let path = upgrade_lock_path(socket);

        for attempt in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt == 0 => {
                    if lock_is_stale(&path) {
                        warn!(path = %path.display(), "reclaiming stale upgrade lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    return Err(SocketError::UpgradeInProgress(path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Err(SocketError::UpgradeInProgress(path));
                }
                Err(e) => return Err(SocketError::Io(e)),
            }
        }

        Err(SocketError::UpgradeInProgress(path))
    }
}

fn lock_is_stale(path: &Path) -> bool {
    path.metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| mtime.elapsed().ok())
        .map(|age| age > UPGRADE_LOCK_STALE)
        .unwrap_or(false)
}

impl Drop for UpgradeLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Terminate processes whose executable name matches `matcher` and whose
/// command line references `daemon_name`.
///
/// Explicit cleanup utility for wedged daemons; never invoked automatically.
/// Returns the PIDs that were signalled.
pub fn cleanup_matching_processes<F: Fn(&str) -> bool>(
    matcher: F,
    daemon_name: &str,
) -> std::io::Result<Vec<u32>> {
    let own_pid = std::process::id();
    let mut killed = Vec::new();

    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        let comm = fs::read_to_string(entry.path().join("comm")).unwrap_or_default();
        if !matcher(comm.trim()) {
            continue;
        }

        let cmdline = fs::read(entry.path().join("cmdline")).unwrap_or_default();
        let cmdline = String::from_utf8_lossy(&cmdline);
        if !cmdline.contains(daemon_name) {
            continue;
        }

        if kill_signal("-TERM", pid) {
            info!(pid, comm = comm.trim(), "terminated matching process");
            killed.push(pid);
        }
    }

    Ok(killed)
}

/// Execute `kill` with the given signal and PID.
pub(crate) fn kill_signal(signal: &str, pid: u32) -> bool {
    std::process::Command::new("kill")
        .args([signal, &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Signal a whole process group. `signal` is the bare name (e.g. `"TERM"`).
pub(crate) fn kill_group(signal: &str, pgid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-s", signal, "--", &format!("-{pgid}")])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check if a process with the given PID exists.
pub(crate) fn process_exists(pid: u32) -> bool {
    kill_signal("-0", pid)
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
