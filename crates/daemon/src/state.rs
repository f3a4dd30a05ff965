// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon state file.
//!
//! Small durable state that must survive restarts: the overlay endpoint,
//! opaque proxy configurations, the project-scoped key/value store, and the
//! list of project directories registered with the scheduler. Writes are
//! atomic (temp + rename); a corrupt file is quarantined to `.bak` so the
//! daemon starts fresh instead of refusing to boot.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors from state persistence.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The persisted shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonStateFile {
    pub version: u32,
    /// When this file was last written.
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub overlay_endpoint: Option<String>,
    /// Opaque proxy configurations keyed by proxy id.
    #[serde(default)]
    pub proxies: BTreeMap<String, serde_json::Value>,
    /// Project-scoped key/value store: project path -> key -> value.
    #[serde(default)]
    pub store: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Project directories known to the scheduler, for startup replay.
    #[serde(default)]
    pub projects: Vec<String>,
}

/// Handle over the state file: in-memory copy plus write-through saves.
pub struct StateStore {
    path: PathBuf,
    state: Mutex<DaemonStateFile>,
    write_failures: AtomicU32,
}

impl StateStore {
    /// Load the state file, quarantining a corrupt one.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load(&path);
        Self {
            path,
            state: Mutex::new(state),
            write_failures: AtomicU32::new(0),
        }
    }

    pub fn overlay_endpoint(&self) -> Option<String> {
        self.state.lock().overlay_endpoint.clone()
    }

    pub fn set_overlay_endpoint(&self, endpoint: Option<String>) {
        let mut state = self.state.lock();
        state.overlay_endpoint = endpoint;
        self.save(&mut state);
    }

    pub fn put_proxy(&self, id: &str, config: serde_json::Value) {
        let mut state = self.state.lock();
        state.proxies.insert(id.to_string(), config);
        self.save(&mut state);
    }

    pub fn remove_proxy(&self, id: &str) {
        let mut state = self.state.lock();
        if state.proxies.remove(id).is_some() {
            self.save(&mut state);
        }
    }

    pub fn proxies(&self) -> BTreeMap<String, serde_json::Value> {
        self.state.lock().proxies.clone()
    }

    pub fn store_get(&self, project: &str, key: &str) -> Option<serde_json::Value> {
        self.state
            .lock()
            .store
            .get(project)
            .and_then(|bucket| bucket.get(key).cloned())
    }

    pub fn store_set(&self, project: &str, key: &str, value: serde_json::Value) {
        let mut state = self.state.lock();
        state
            .store
            .entry(project.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.save(&mut state);
    }

    /// Remove one key; true when it existed.
    pub fn store_delete(&self, project: &str, key: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state
            .store
            .get_mut(project)
            .map(|bucket| bucket.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            self.save(&mut state);
        }
        removed
    }

    pub fn store_keys(&self, project: &str) -> Vec<String> {
        self.state
            .lock()
            .store
            .get(project)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn store_all(&self, project: &str) -> BTreeMap<String, serde_json::Value> {
        self.state
            .lock()
            .store
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a project's whole bucket; returns the number of keys removed.
    pub fn store_clear(&self, project: &str) -> usize {
        let mut state = self.state.lock();
        let removed = state
            .store
            .remove(project)
            .map(|bucket| bucket.len())
            .unwrap_or(0);
        if removed > 0 {
            self.save(&mut state);
        }
        removed
    }

    /// Register a project directory; true when it was new.
    pub fn register_project(&self, project: &str) -> bool {
        if project.is_empty() {
            return false;
        }
        let mut state = self.state.lock();
        if state.projects.iter().any(|p| p == project) {
            return false;
        }
        state.projects.push(project.to_string());
        self.save(&mut state);
        true
    }

    pub fn projects(&self) -> Vec<String> {
        self.state.lock().projects.clone()
    }

    /// Consecutive failed writes; the daemon treats repeated failure as fatal.
    pub fn write_failures(&self) -> u32 {
        self.write_failures.load(Ordering::SeqCst)
    }

    fn save(&self, state: &mut DaemonStateFile) {
        state.version = 1;
        state.saved_at = Some(Utc::now());
        match write_atomic(&self.path, state) {
            Ok(()) => {
                self.write_failures.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                let failures = self.write_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(error = %e, failures, "failed to write state file");
            }
        }
    }
}

fn load(path: &Path) -> DaemonStateFile {
    if !path.exists() {
        return DaemonStateFile::default();
    }
    match fs::read_to_string(path)
        .map_err(StateError::from)
        .and_then(|s| serde_json::from_str(&s).map_err(StateError::from))
    {
        Ok(state) => state,
        Err(e) => {
            let bak = path.with_extension("json.bak");
            warn!(
                error = %e,
                path = %path.display(),
                bak = %bak.display(),
                "corrupt state file, moving to .bak and starting fresh",
            );
            let _ = fs::rename(path, &bak);
            DaemonStateFile::default()
        }
    }
}

fn write_atomic(path: &Path, state: &DaemonStateFile) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(state)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
