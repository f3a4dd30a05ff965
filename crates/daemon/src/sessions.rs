// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: directory-scoped client contexts.
//!
//! A session ties a named interactive client (typically one agent or
//! terminal instance) to a project directory and an overlay endpoint.
//! Sessions carry a heartbeat; a session that stops heartbeating flips to
//! `disconnected` and is ignored by directory lookups until it returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agnt_core::{Clock, ProjectPath, SessionCode, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Disconnected,
}

/// Registration parameters for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub code: String,
    #[serde(default)]
    pub overlay_path: String,
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A registered session.
///
/// Immutable identity fields plus a small mutable core (`status`,
/// `last_seen`) guarded by a per-session mutex.
pub struct Session {
    pub code: SessionCode,
    pub overlay_path: String,
    pub project_path: ProjectPath,
    pub command: String,
    pub args: Vec<String>,
    pub started_at_ms: u64,
    state: Mutex<SessionState>,
}

struct SessionState {
    status: SessionStatus,
    last_seen_ms: u64,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.state.lock().last_seen_ms
    }

    /// Snapshot for JSON responses.
    pub fn info(&self) -> SessionInfo {
        let state = self.state.lock();
        SessionInfo {
            code: self.code.clone(),
            overlay_path: self.overlay_path.clone(),
            project_path: self.project_path.to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
            started_at_ms: self.started_at_ms,
            last_seen_ms: state.last_seen_ms,
            status: state.status,
        }
    }
}

/// Serializable session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub code: SessionCode,
    pub overlay_path: String,
    pub project_path: String,
    pub command: String,
    pub args: Vec<String>,
    pub started_at_ms: u64,
    pub last_seen_ms: u64,
    pub status: SessionStatus,
}

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session code is empty")]
    EmptyCode,

    #[error("session already exists: {0}")]
    AlreadyExists(SessionCode),

    #[error("session not found: {0}")]
    NotFound(String),
}

/// Registry counters, exposed via `INFO`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistryCounters {
    pub total_registered: u64,
    pub total_unregistered: u64,
    pub active_count: u64,
}

/// The session registry.
///
/// Invariant: `active_count` equals the number of sessions whose status is
/// `active`. All status flips go through registry methods that maintain it.
pub struct SessionRegistry<C: Clock = SystemClock> {
    clock: C,
    heartbeat_timeout: Duration,
    sessions: Mutex<HashMap<SessionCode, Arc<Session>>>,
    total_registered: AtomicU64,
    total_unregistered: AtomicU64,
    active_count: AtomicU64,
}

impl SessionRegistry<SystemClock> {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self::with_clock(SystemClock, heartbeat_timeout)
    }
}

impl<C: Clock> SessionRegistry<C> {
    pub fn with_clock(clock: C, heartbeat_timeout: Duration) -> Self {
        Self {
            clock,
            heartbeat_timeout,
            sessions: Mutex::new(HashMap::new()),
            total_registered: AtomicU64::new(0),
            total_unregistered: AtomicU64::new(0),
            active_count: AtomicU64::new(0),
        }
    }

    /// Register a new session. The code must be unique and non-empty.
    pub fn register(&self, config: SessionConfig) -> Result<Arc<Session>, RegistryError> {
        if config.code.trim().is_empty() {
            return Err(RegistryError::EmptyCode);
        }
        let code = SessionCode::new(config.code.trim());
        let now = self.clock.epoch_ms();

        let session = Arc::new(Session {
            code: code.clone(),
            overlay_path: config.overlay_path,
            project_path: ProjectPath::new(&config.project_path),
            command: config.command,
            args: config.args,
            started_at_ms: now,
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                last_seen_ms: now,
            }),
        });

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&code) {
            return Err(RegistryError::AlreadyExists(code));
        }
        sessions.insert(code.clone(), Arc::clone(&session));
        drop(sessions);

        self.total_registered.fetch_add(1, Ordering::SeqCst);
        self.active_count.fetch_add(1, Ordering::SeqCst);
        info!(code = %code, project = %session.project_path, "session registered");
        Ok(session)
    }

    /// Remove a session.
    pub fn unregister(&self, code: &str) -> Result<Arc<Session>, RegistryError> {
        let removed = self
            .sessions
            .lock()
            .remove(code)
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))?;

        self.total_unregistered.fetch_add(1, Ordering::SeqCst);
        if removed.state.lock().status == SessionStatus::Active {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        info!(code, "session unregistered");
        Ok(removed)
    }

    pub fn get(&self, code: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(code).cloned()
    }

    /// Record a heartbeat: refresh `last_seen` and flip back to active.
    pub fn heartbeat(&self, code: &str) -> Result<(), RegistryError> {
        let session = self
            .get(code)
            .ok_or_else(|| RegistryError::NotFound(code.to_string()))?;

        let mut state = session.state.lock();
        state.last_seen_ms = self.clock.epoch_ms();
        if state.status == SessionStatus::Disconnected {
            state.status = SessionStatus::Active;
            self.active_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// List sessions, filtered by project path unless `global` is set.
    pub fn list(&self, project_path: &ProjectPath, global: bool) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .lock()
            .values()
            .filter(|s| global || s.project_path.matches(project_path))
            .map(|s| s.info())
            .collect();
        infos.sort_by(|a, b| a.code.as_str().cmp(b.code.as_str()));
        infos
    }

    /// Flip sessions whose heartbeat has expired to `disconnected`.
    ///
    /// Invoked periodically by the daemon loop. Returns the codes flipped.
    pub fn check_heartbeats(&self) -> Vec<SessionCode> {
        let cutoff = self
            .clock
            .epoch_ms()
            .saturating_sub(self.heartbeat_timeout.as_millis() as u64);

        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        let mut flipped = Vec::new();
        for session in sessions {
            let mut state = session.state.lock();
            if state.status == SessionStatus::Active && state.last_seen_ms < cutoff {
                state.status = SessionStatus::Disconnected;
                self.active_count.fetch_sub(1, Ordering::SeqCst);
                flipped.push(session.code.clone());
            }
        }
        if !flipped.is_empty() {
            info!(count = flipped.len(), "sessions marked disconnected");
        }
        flipped
    }

    /// Generate the next free code for a command: `<command>-N` where N is
    /// one past the highest existing suffix for that command.
    pub fn generate_session_code(&self, command: &str) -> String {
        let prefix = format!("{command}-");
        let max = self
            .sessions
            .lock()
            .keys()
            .filter_map(|code| code.as_str().strip_prefix(&prefix))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("{command}-{}", max + 1)
    }

    /// Find the active session whose project path is the deepest ancestor
    /// of (or equal to) the query directory.
    ///
    /// The ancestry test is component-wise, so `/home/u/proj` never matches
    /// a query under `/home/u/project`. Inactive sessions are ignored; ties
    /// resolve to the deepest project path.
    pub fn find_by_directory(&self, dir: &str) -> Option<Arc<Session>> {
        let query = ProjectPath::new(dir);
        if query.is_unbound() {
            return None;
        }

        self.sessions
            .lock()
            .values()
            .filter(|s| s.state.lock().status == SessionStatus::Active)
            .filter(|s| s.project_path.is_ancestor_of(&query))
            .max_by_key(|s| s.project_path.depth())
            .cloned()
    }

    pub fn counters(&self) -> RegistryCounters {
        RegistryCounters {
            total_registered: self.total_registered.load(Ordering::SeqCst),
            total_unregistered: self.total_unregistered.load(Ordering::SeqCst),
            active_count: self.active_count.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
