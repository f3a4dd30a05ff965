// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: configuration, startup, run loop, shutdown.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agnt_core::ProjectPath;
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::facades::{
    ChaosState, FsDetector, LocalProxyManager, LocalTunnelManager, NoopAutomation, ProxyLogStore,
    ProxyManager,
};
use crate::listener::{ListenCtx, Listener};
use crate::orphans::{self, PidList};
use crate::overlay::OverlayEndpoint;
use crate::scheduler::{OverlayDeliver, Scheduler};
use crate::sessions::SessionRegistry;
use crate::socket::{self, SocketError};
use crate::state::StateStore;
use crate::supervisor::ProcessSupervisor;
use crate::{env, protocol};

/// How long shutdown waits for managed processes to stop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive state-file write failures tolerated before giving up.
const MAX_STATE_WRITE_FAILURES: u32 = 5;

/// Proxy traffic log capacity.
const PROXY_LOG_CAPACITY: usize = 10_000;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/agnt)
    pub state_dir: PathBuf,
    /// Path to the control socket
    pub socket_path: PathBuf,
    /// Path to the exclusive lock file
    pub lock_path: PathBuf,
    /// Path to the daemon log file
    pub log_path: PathBuf,
    /// Path to the durable state file
    pub state_file: PathBuf,
    /// Path to the supervised PID list
    pub pid_list_path: PathBuf,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        Ok(Self {
            socket_path: env::socket_path(),
            lock_path: state_dir.join("daemon.lock"),
            log_path: state_dir.join("daemon.log"),
            state_file: state_dir.join("state.json"),
            pid_list_path: state_dir.join("processes.json"),
            state_dir,
        })
    }

    /// Override the socket path (`--socket`).
    pub fn with_socket(mut self, socket: PathBuf) -> Self {
        self.socket_path = socket;
        self
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): held to maintain the exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub ctx: Arc<ListenCtx>,
    pub shutdown: Arc<Notify>,
}

/// Result of daemon startup.
pub struct StartupResult {
    pub daemon: DaemonState,
    /// The bound socket, to be handed to the [`Listener`].
    pub listener: UnixListener,
}

impl std::fmt::Debug for StartupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupResult").finish_non_exhaustive()
    }
}

/// Start the daemon: lock, recover, wire the subsystems, bind last.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Lock contention means the files belong to the running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                socket::remove_runtime_files(&config.socket_path);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Acquire the lock first; everything after this is ours.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Reclaim children left behind by a crashed daemon before starting new
    // ones, so ports and PIDs are free again.
    let reclaimed = orphans::reclaim_orphans(&config.pid_list_path);
    if !reclaimed.is_empty() {
        info!(count = reclaimed.len(), "reclaimed orphaned processes");
    }

    // Durable state and the overlay endpoint it carries.
    let state = Arc::new(StateStore::open(&config.state_file));
    let overlay = Arc::new(OverlayEndpoint::new(state.overlay_endpoint()));

    let registry = Arc::new(SessionRegistry::new(env::heartbeat_timeout()));

    let pid_list = Arc::new(PidList::open(&config.pid_list_path));
    let supervisor = Arc::new(
        ProcessSupervisor::new(env::ring_capacity(), env::stop_grace())
            .with_pid_list(pid_list)
            .with_observation(env::observe_window(), env::observe_poll()),
    );

    // Scheduler replays the backlog of every project it has seen.
    let scheduler = Arc::new(Scheduler::new());
    let mut replayed = 0;
    for project in state.projects() {
        replayed += scheduler.register_project(&ProjectPath::from_normalized(project));
    }
    if replayed > 0 {
        info!(count = replayed, "loaded persisted scheduler tasks");
    }

    // Facades; persisted proxy configs are re-registered.
    let proxies: Arc<dyn ProxyManager> = Arc::new(LocalProxyManager::new(
        Arc::clone(&overlay),
        Arc::clone(&state),
    ));
    for (id, proxy_config) in state.proxies() {
        let project = proxy_config
            .get("project_path")
            .and_then(|v| v.as_str())
            .map(ProjectPath::new)
            .unwrap_or_default();
        if let Err(e) = proxies.start(&id, &project, proxy_config).await {
            warn!(id, error = %e, "failed to restore persisted proxy");
        }
    }

    let shutdown = Arc::new(Notify::new());
    let ctx = Arc::new(ListenCtx::new(
        registry,
        supervisor,
        scheduler,
        proxies,
        Arc::new(ProxyLogStore::new(PROXY_LOG_CAPACITY)),
        Arc::new(crate::facades::PageSessionStore::new()),
        Arc::new(LocalTunnelManager::new()),
        Arc::new(ChaosState::new()),
        Arc::new(NoopAutomation::new()),
        Arc::new(FsDetector::new()),
        overlay,
        state,
        Arc::clone(&shutdown),
        env::max_clients(),
    ));

    // Bind LAST, after every recoverable failure has had its chance.
    let listener = socket::listen(&config.socket_path).await?;
    socket::write_pid_file(&config.socket_path, std::process::id())?;

    info!(socket = %config.socket_path.display(), "daemon started");

    Ok(StartupResult {
        daemon: DaemonState {
            config: config.clone(),
            lock_file,
            ctx,
            shutdown,
        },
        listener,
    })
}

impl DaemonState {
    /// Graceful shutdown: stop children with a bounded timeout, then remove
    /// the socket and PID files. The lock releases when `self` drops.
    pub async fn shutdown(&mut self) {
        info!("shutting down daemon...");

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.ctx.supervisor.stop_all())
            .await
            .is_err()
        {
            warn!("timed out stopping managed processes");
        }

        socket::remove_runtime_files(&self.config.socket_path);
        info!("daemon shutdown complete");
    }
}

/// Run the daemon in the foreground until a signal or `SHUTDOWN` arrives.
pub async fn run(config: Config) -> Result<(), LifecycleError> {
    let StartupResult {
        mut daemon,
        listener,
    } = startup(&config).await?;

    let ctx = Arc::clone(&daemon.ctx);
    tokio::spawn(Listener::new(listener, Arc::clone(&ctx)).run());

    // Scheduler dispatch loop. It gets its own stop signal: the shared
    // shutdown Notify carries a single permit that must reach the loop below.
    let scheduler_stop = Arc::new(Notify::new());
    tokio::spawn(Arc::clone(&ctx.scheduler).run(
        Arc::clone(&ctx.registry),
        Arc::new(OverlayDeliver),
        Arc::clone(&scheduler_stop),
    ));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    // Heartbeat sweep interval.
    //
    // NOTE: created outside the loop — `tokio::select!` re-evaluates branches
    // on each iteration, so an inline `sleep()` would reset every time
    // another branch fires.
    let mut heartbeat_check = tokio::time::interval(env::heartbeat_check_interval());

    info!(
        version = protocol::PROTOCOL_VERSION,
        socket = %daemon.config.socket_path.display(),
        "daemon ready"
    );

    // Signal ready for a parent process waiting on startup.
    println!("READY");

    let mut fatal: Option<LifecycleError> = None;
    loop {
        tokio::select! {
            _ = daemon.shutdown.notified() => {
                info!("shutdown requested via command");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down...");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down...");
                break;
            }
            _ = heartbeat_check.tick() => {
                let flipped = ctx.registry.check_heartbeats();
                if !flipped.is_empty() {
                    warn!(sessions = ?flipped, "heartbeat timeout");
                }

                // A state dir that stops taking writes is fatal: durable
                // state would silently drift from reality.
                let failures = ctx.state.write_failures();
                if failures >= MAX_STATE_WRITE_FAILURES {
                    fatal = Some(LifecycleError::Io(std::io::Error::other(format!(
                        "state file writes failed {failures} times in a row"
                    ))));
                    break;
                }
            }
        }
    }

    scheduler_stop.notify_one();
    daemon.shutdown().await;
    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `daemon.log` -> `daemon.log.1` -> `daemon.log.2` -> `daemon.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently ignored
/// so the daemon still starts.
pub fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker prefix written to the log before anything else.
/// Clients use it to find where the current startup attempt begins.
pub const STARTUP_MARKER_PREFIX: &str = "--- agntd: starting (pid: ";

/// Write the startup marker to the log file (appends).
pub fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{}{}) ---\n", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

/// Write a startup error synchronously so it is visible to clients even if
/// the process exits before the tracing appender flushes.
pub fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start daemon: {}", error);
}

/// Set up file logging with an env filter. Returns the appender guard.
pub fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        config
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
