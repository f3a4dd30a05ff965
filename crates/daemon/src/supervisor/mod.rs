// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process supervisor: start, reuse, observe, and stop child processes.
//!
//! Every managed process is keyed by `(id, project_path)` and owned by
//! exactly one supervisor. Spawning goes through an observation window that
//! classifies early failures (most importantly EADDRINUSE) and retries once
//! after evicting the conflicting foreign listener.

pub mod ports;
pub mod ring;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agnt_core::{Clock, ProcessId, ProjectPath, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::orphans::PidList;
use crate::socket::{kill_group, kill_signal, process_exists};
use ports::PortTable;
use ring::RingBuffer;

/// Classified startup failure: the port was taken.
pub const ERROR_ADDR_IN_USE: &str = "EADDRINUSE";
/// Classified startup failure: anything else.
pub const ERROR_STARTUP_FAILED: &str = "startup_failed";

/// Wait after pre-emptively killing a port's listeners before spawning.
const PREEMPT_WAIT: Duration = Duration::from_millis(200);

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl ProcessState {
    /// Live states block a second start for the same `(id, project_path)`.
    pub fn is_live(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }
}

/// Spawn configuration for a managed process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub id: String,
    #[serde(default)]
    pub project_path: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Port the process is expected to bind, for conflict pre-emption.
    /// When absent, a hint is extracted from the command line.
    #[serde(default)]
    pub expected_port: Option<u16>,
}

/// Which output stream to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
    Combined,
}

impl OutputStream {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Some(OutputStream::Stdout),
            "stderr" => Some(OutputStream::Stderr),
            "combined" | "all" => Some(OutputStream::Combined),
            _ => None,
        }
    }
}

/// A supervised child process.
pub struct ManagedProcess {
    pub id: ProcessId,
    pub project_path: ProjectPath,
    pub command: String,
    pub args: Vec<String>,
    pub started_at_ms: u64,
    inner: Mutex<ProcInner>,
    done_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

struct ProcInner {
    state: ProcessState,
    pid: Option<u32>,
    exit_code: Option<i32>,
    stopping: bool,
    stdout: RingBuffer,
    stderr: RingBuffer,
    combined: RingBuffer,
}

impl ManagedProcess {
    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.lock().exit_code
    }

    /// Contents of one output stream.
    pub fn output(&self, stream: OutputStream) -> Vec<u8> {
        let inner = self.inner.lock();
        match stream {
            OutputStream::Stdout => inner.stdout.contents(),
            OutputStream::Stderr => inner.stderr.contents(),
            OutputStream::Combined => inner.combined.contents(),
        }
    }

    fn stderr_text(&self) -> String {
        self.inner.lock().stderr.to_string_lossy()
    }

    /// Wait until the process has exited (or was never observed to start).
    pub async fn wait_done(&self) {
        let mut rx = self.done_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Snapshot for JSON responses.
    pub fn info(&self) -> ProcessInfo {
        let inner = self.inner.lock();
        ProcessInfo {
            id: self.id.clone(),
            project_path: self.project_path.to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
            pid: inner.pid,
            state: inner.state,
            exit_code: inner.exit_code,
            started_at_ms: self.started_at_ms,
            stdout_dropped: inner.stdout.dropped(),
            stderr_dropped: inner.stderr.dropped(),
        }
    }

    fn push_stdout(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        inner.stdout.push(bytes);
        inner.combined.push(bytes);
    }

    fn push_stderr(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        inner.stderr.push(bytes);
        inner.combined.push(bytes);
    }

    fn mark_running(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ProcessState::Starting {
            inner.state = ProcessState::Running;
        }
    }

    fn mark_stopping(&self) {
        self.inner.lock().stopping = true;
    }

    fn record_exit(&self, status: Option<std::process::ExitStatus>) {
        let mut inner = self.inner.lock();
        inner.exit_code = status.and_then(|s| s.code());
        inner.state = if inner.stopping {
            ProcessState::Stopped
        } else {
            match inner.exit_code {
                Some(0) => ProcessState::Stopped,
                _ => ProcessState::Failed,
            }
        };
    }
}

/// Serializable process snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub project_path: String,
    pub command: String,
    pub args: Vec<String>,
    pub pid: Option<u32>,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub started_at_ms: u64,
    pub stdout_dropped: u64,
    pub stderr_dropped: u64,
}

/// Structured startup failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupError {
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub retried: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr_tail: String,
}

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process not found: {0}")]
    NotFound(String),

    #[error("process id is empty")]
    EmptyId,

    #[error("invalid port: {0}")]
    InvalidPort(u64),

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("startup failed: {}", .0.error_type)]
    Startup(StartupError),
}

/// Result of [`ProcessSupervisor::start_or_reuse`].
#[derive(Debug)]
pub struct StartOutcome {
    pub process: Arc<ManagedProcess>,
    /// An existing live process with the same key was returned.
    pub reused: bool,
    /// A dead entry with the same key was dropped before starting fresh.
    pub cleaned: bool,
    /// The spawn succeeded only after an EADDRINUSE retry.
    pub retried: bool,
    /// A foreign listener was evicted to make the retry succeed.
    pub port_conflict_resolved: bool,
}

/// Supervisor counters, exposed via `INFO`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SupervisorCounters {
    pub total_started: u64,
    pub live_count: u64,
}

/// The process supervisor.
pub struct ProcessSupervisor<C: Clock = SystemClock> {
    clock: C,
    procs: Mutex<HashMap<String, Arc<ManagedProcess>>>,
    ports: Arc<PortTable>,
    pid_list: Option<Arc<PidList>>,
    total_started: AtomicU64,
    ring_capacity: usize,
    stop_grace: Duration,
    observe_window: Duration,
    poll_interval: Duration,
}

fn scoped_key(project: &ProjectPath, id: &str) -> String {
    format!("{}#{}", project, id)
}

impl ProcessSupervisor<SystemClock> {
    pub fn new(ring_capacity: usize, stop_grace: Duration) -> Self {
        Self::with_clock(SystemClock, ring_capacity, stop_grace)
    }
}

impl<C: Clock> ProcessSupervisor<C> {
    pub fn with_clock(clock: C, ring_capacity: usize, stop_grace: Duration) -> Self {
        Self {
            clock,
            procs: Mutex::new(HashMap::new()),
            ports: Arc::new(PortTable::new()),
            pid_list: None,
            total_started: AtomicU64::new(0),
            ring_capacity,
            stop_grace,
            observe_window: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Record spawned PIDs on disk for orphan reclamation after a crash.
    pub fn with_pid_list(mut self, pid_list: Arc<PidList>) -> Self {
        self.pid_list = Some(pid_list);
        self
    }

    /// Shorten the startup observation window (tests).
    pub fn with_observation(mut self, window: Duration, poll: Duration) -> Self {
        self.observe_window = window;
        self.poll_interval = poll;
        self
    }

    /// Idempotent start keyed by `(id, project_path)`.
    ///
    /// A live entry with the same key is returned with `reused`; a dead one
    /// is dropped (`cleaned`) and the process started fresh, going through
    /// EADDRINUSE detection and a single eviction retry.
    pub async fn start_or_reuse(
        &self,
        config: ProcessConfig,
    ) -> Result<StartOutcome, SupervisorError> {
        if config.id.trim().is_empty() {
            return Err(SupervisorError::EmptyId);
        }
        let project = ProjectPath::new(&config.project_path);
        let key = scoped_key(&project, config.id.trim());

        let mut cleaned = false;
        {
            let mut procs = self.procs.lock();
            if let Some(existing) = procs.get(&key) {
                if existing.state().is_live() {
                    return Ok(StartOutcome {
                        process: Arc::clone(existing),
                        reused: true,
                        cleaned: false,
                        retried: false,
                        port_conflict_resolved: false,
                    });
                }
                procs.remove(&key);
                cleaned = true;
            }
        }

        let expected_port = config
            .expected_port
            .or_else(|| ports::extract_port(&config.command, &config.args));

        // Pre-empt known foreign listeners on the expected port.
        let mut resolved = false;
        if let Some(port) = expected_port {
            let evicted = self.kill_foreign_listeners(port).await;
            if !evicted.is_empty() {
                info!(port, pids = ?evicted, "pre-emptively evicted foreign listeners");
                resolved = true;
            }
            tokio::time::sleep(PREEMPT_WAIT).await;
        }

        match self.spawn_and_observe(&config, &project, &key, expected_port).await {
            Ok(process) => Ok(StartOutcome {
                process,
                reused: false,
                cleaned,
                retried: false,
                port_conflict_resolved: resolved,
            }),
            Err(SupervisorError::Startup(err)) if err.error_type == ERROR_ADDR_IN_USE => {
                let port = err.port.or(expected_port);
                warn!(id = %config.id, ?port, "startup hit EADDRINUSE, evicting and retrying");
                if let Some(port) = port {
                    resolved |= !self.kill_foreign_listeners(port).await.is_empty();
                    tokio::time::sleep(PREEMPT_WAIT).await;
                }
                match self.spawn_and_observe(&config, &project, &key, expected_port).await {
                    Ok(process) => Ok(StartOutcome {
                        process,
                        reused: false,
                        cleaned,
                        retried: true,
                        port_conflict_resolved: resolved,
                    }),
                    Err(SupervisorError::Startup(mut second)) => {
                        second.retried = true;
                        Err(SupervisorError::Startup(second))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn spawn_and_observe(
        &self,
        config: &ProcessConfig,
        project: &ProjectPath,
        key: &str,
        expected_port: Option<u16>,
    ) -> Result<Arc<ManagedProcess>, SupervisorError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(false);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        } else if !project.is_unbound() && std::path::Path::new(&**project).is_dir() {
            cmd.current_dir(&**project);
        }

        let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        let pid = child.id();

        let (done_tx, _done_rx) = watch::channel(false);
        let process = Arc::new(ManagedProcess {
            id: ProcessId::new(config.id.trim()),
            project_path: project.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            started_at_ms: self.clock.epoch_ms(),
            inner: Mutex::new(ProcInner {
                state: ProcessState::Starting,
                pid,
                exit_code: None,
                stopping: false,
                stdout: RingBuffer::new(self.ring_capacity),
                stderr: RingBuffer::new(self.ring_capacity),
                combined: RingBuffer::new(self.ring_capacity),
            }),
            done_tx,
        });

        self.procs.lock().insert(key.to_string(), Arc::clone(&process));
        self.total_started.fetch_add(1, Ordering::SeqCst);
        if let (Some(port), Some(pid)) = (expected_port, pid) {
            self.ports.insert(port, pid);
        }
        if let (Some(pid_list), Some(pid)) = (&self.pid_list, pid) {
            pid_list.record_spawn(pid, config.id.trim(), project);
        }

        tokio::spawn(monitor(
            child,
            Arc::clone(&process),
            Arc::clone(&self.ports),
            self.pid_list.clone(),
        ));

        // Observation window: classify early failures.
        let deadline = Instant::now() + self.observe_window;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let state = process.state();
            if !state.is_live() {
                let stderr = process.stderr_text();
                let exit_code = process.exit_code();
                if exit_code == Some(0) && ports::scan_addr_in_use(&stderr).is_none() {
                    // Completed cleanly within the window (build scripts).
                    return Ok(process);
                }
                self.procs.lock().remove(key);
                return Err(SupervisorError::Startup(classify_failure(
                    &stderr, exit_code,
                )));
            }

            // Still running, but some servers report the bind failure before
            // exiting (or keep retrying); classify without waiting for exit.
            if let Some(port) = ports::scan_addr_in_use(&process.stderr_text()) {
                self.terminate(&process).await;
                self.procs.lock().remove(key);
                return Err(SupervisorError::Startup(StartupError {
                    error_type: ERROR_ADDR_IN_USE.to_string(),
                    port,
                    exit_code: process.exit_code(),
                    retried: false,
                    stderr_tail: tail(&process.stderr_text()),
                }));
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        process.mark_running();
        debug!(id = %process.id, pid = ?process.pid(), "process survived startup window");
        Ok(process)
    }

    /// Exact lookup by id, optionally biased to a project for disambiguation.
    pub fn get(&self, id: &str, project: Option<&ProjectPath>) -> Option<Arc<ManagedProcess>> {
        let procs = self.procs.lock();
        if let Some(project) = project {
            let key = scoped_key(project, id);
            if let Some(found) = procs.get(&key) {
                return Some(Arc::clone(found));
            }
        }
        procs
            .values()
            .find(|p| p.id.as_str() == id)
            .map(Arc::clone)
    }

    /// All process snapshots, sorted by id.
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> =
            self.procs.lock().values().map(|p| p.info()).collect();
        infos.sort_by(|a, b| {
            (a.project_path.as_str(), a.id.as_str()).cmp(&(b.project_path.as_str(), b.id.as_str()))
        });
        infos
    }

    /// Stop a process: graceful TERM, hard KILL after the grace period.
    pub async fn stop(
        &self,
        id: &str,
        project: Option<&ProjectPath>,
        force: bool,
    ) -> Result<Arc<ManagedProcess>, SupervisorError> {
        let process = self
            .get(id, project)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        self.stop_process(&process, force).await;
        Ok(process)
    }

    async fn stop_process(&self, process: &Arc<ManagedProcess>, force: bool) {
        if !process.state().is_live() {
            return;
        }
        process.mark_stopping();

        let Some(pid) = process.pid() else { return };
        let grace = if force {
            Duration::from_millis(100)
        } else {
            self.stop_grace
        };

        // The child runs in its own process group; signal the whole group so
        // shell wrappers take their children down with them.
        kill_group("TERM", pid);
        let exited = tokio::time::timeout(grace, process.wait_done()).await.is_ok();
        if !exited {
            warn!(id = %process.id, pid, "graceful stop timed out, killing");
            kill_group("KILL", pid);
            let _ = tokio::time::timeout(self.stop_grace, process.wait_done()).await;
        }
        info!(id = %process.id, pid, "process stopped");
    }

    /// Stop every process whose project path matches. Returns the ids stopped.
    pub async fn stop_by_project_path(&self, project: &ProjectPath) -> Vec<ProcessId> {
        let targets: Vec<Arc<ManagedProcess>> = self
            .procs
            .lock()
            .values()
            .filter(|p| p.project_path.matches(project) && p.state().is_live())
            .cloned()
            .collect();

        let mut stopped = Vec::new();
        for process in targets {
            self.stop_process(&process, false).await;
            stopped.push(process.id.clone());
        }
        stopped
    }

    async fn terminate(&self, process: &Arc<ManagedProcess>) {
        self.stop_process(process, true).await;
    }

    /// Kill every listener on a port that is not one of our managed PIDs.
    ///
    /// Returns all PIDs found listening (ours included). Used by session
    /// cleanup and conflict recovery.
    pub async fn kill_process_by_port(&self, port: u64) -> Result<Vec<u32>, SupervisorError> {
        if port == 0 || port > u64::from(u16::MAX) {
            return Err(SupervisorError::InvalidPort(port));
        }
        let port = port as u16;
        let pids = ports::listeners_on_port(port).await;
        self.kill_listed(port, &pids).await;
        Ok(pids)
    }

    async fn kill_foreign_listeners(&self, port: u16) -> Vec<u32> {
        let pids = ports::listeners_on_port(port).await;
        self.kill_listed(port, &pids).await
    }

    async fn kill_listed(&self, port: u16, pids: &[u32]) -> Vec<u32> {
        let foreign: Vec<u32> = pids
            .iter()
            .copied()
            .filter(|pid| !self.ports.is_ours(port, *pid))
            .collect();

        for pid in &foreign {
            info!(port, pid, "killing foreign listener");
            kill_signal("-TERM", *pid);
        }
        if !foreign.is_empty() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            for pid in &foreign {
                if process_exists(*pid) {
                    kill_signal("-KILL", *pid);
                }
            }
        }
        foreign
    }

    /// `(id, project)` pairs for fuzzy resolution.
    pub fn entries(&self) -> Vec<(String, ProjectPath)> {
        self.procs
            .lock()
            .values()
            .map(|p| (p.id.as_str().to_string(), p.project_path.clone()))
            .collect()
    }

    /// The port table (for INFO and tests).
    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    pub fn counters(&self) -> SupervisorCounters {
        let live = self
            .procs
            .lock()
            .values()
            .filter(|p| p.state().is_live())
            .count() as u64;
        SupervisorCounters {
            total_started: self.total_started.load(Ordering::SeqCst),
            live_count: live,
        }
    }

    /// Stop everything that is still live (graceful shutdown).
    pub async fn stop_all(&self) {
        let targets: Vec<Arc<ManagedProcess>> = self
            .procs
            .lock()
            .values()
            .filter(|p| p.state().is_live())
            .cloned()
            .collect();
        for process in targets {
            self.stop_process(&process, false).await;
        }
    }
}

/// Per-child supervising task: drain output into the rings, await exit,
/// release port-table and PID-list entries, then signal `done`.
async fn monitor(
    mut child: Child,
    process: Arc<ManagedProcess>,
    ports: Arc<PortTable>,
    pid_list: Option<Arc<PidList>>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_task = stdout.map(|mut stream| {
        let process = Arc::clone(&process);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                process.push_stdout(&buf[..n]);
            }
        })
    });
    let err_task = stderr.map(|mut stream| {
        let process = Arc::clone(&process);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                process.push_stderr(&buf[..n]);
            }
        })
    });

    let status = child.wait().await.ok();

    // Drain remaining output before publishing the exit.
    if let Some(task) = out_task {
        let _ = task.await;
    }
    if let Some(task) = err_task {
        let _ = task.await;
    }

    process.record_exit(status);
    if let Some(pid) = process.pid() {
        ports.remove_pid(pid);
        if let Some(pid_list) = &pid_list {
            pid_list.record_exit(pid);
        }
    }
    debug!(
        id = %process.id,
        state = ?process.state(),
        exit_code = ?process.exit_code(),
        "process exited"
    );
    let _ = process.done_tx.send(true);
}

fn classify_failure(stderr: &str, exit_code: Option<i32>) -> StartupError {
    match ports::scan_addr_in_use(stderr) {
        Some(port) => StartupError {
            error_type: ERROR_ADDR_IN_USE.to_string(),
            port,
            exit_code,
            retried: false,
            stderr_tail: tail(stderr),
        },
        None => StartupError {
            error_type: ERROR_STARTUP_FAILED.to_string(),
            port: None,
            exit_code,
            retried: false,
            stderr_tail: tail(stderr),
        },
    }
}

/// Last few hundred bytes of stderr, for error payloads.
fn tail(s: &str) -> String {
    const TAIL: usize = 512;
    if s.len() <= TAIL {
        return s.to_string();
    }
    let mut start = s.len() - TAIL;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
