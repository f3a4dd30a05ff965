// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reverse-proxy facade: registry, traffic log store, page sessions.
//!
//! The HTTP/WS plumbing lives outside the core. The daemon keeps the
//! project-scoped registry (so cleanup and scoped lookups work), persists
//! opaque proxy configs, and hands each proxy a subscription to the overlay
//! endpoint instead of a back-pointer to the daemon.

use std::collections::HashMap;
use std::sync::Arc;

use agnt_core::{ProjectPath, WireError};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::info;

use crate::overlay::OverlayEndpoint;
use crate::state::StateStore;

/// Proxy control surface used by the dispatcher.
#[async_trait::async_trait]
pub trait ProxyManager: Send + Sync {
    async fn start(
        &self,
        id: &str,
        project: &ProjectPath,
        config: Value,
    ) -> Result<Value, WireError>;
    async fn stop(&self, id: &str) -> Result<Value, WireError>;
    async fn status(&self, id: &str) -> Result<Value, WireError>;
    async fn list(&self) -> Vec<ProxyInfo>;
    /// Run a script in the proxy's attached page. Capped at 30s by callers.
    async fn exec(&self, id: &str, script: &str) -> Result<Value, WireError>;
    async fn toast(&self, id: &str, message: &str) -> Result<(), WireError>;
    /// Stop every proxy scoped to a project; returns the ids stopped.
    async fn stop_by_project(&self, project: &ProjectPath) -> Vec<String>;
    /// `(id, project)` pairs for fuzzy resolution.
    fn entries(&self) -> Vec<(String, ProjectPath)>;
}

/// Registry entry snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyInfo {
    pub id: String,
    pub project_path: String,
    pub status: String,
    pub config: Value,
}

struct ProxyEntry {
    project: ProjectPath,
    config: Value,
    // Held so the proxy reads the current overlay endpoint at call time.
    #[allow(dead_code)]
    overlay_rx: watch::Receiver<Option<String>>,
}

/// In-daemon proxy registry.
pub struct LocalProxyManager {
    entries: Mutex<HashMap<String, ProxyEntry>>,
    overlay: Arc<OverlayEndpoint>,
    state: Arc<StateStore>,
}

impl LocalProxyManager {
    pub fn new(overlay: Arc<OverlayEndpoint>, state: Arc<StateStore>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            overlay,
            state,
        }
    }

    fn info(&self, id: &str, entry: &ProxyEntry) -> ProxyInfo {
        ProxyInfo {
            id: id.to_string(),
            project_path: entry.project.to_string(),
            status: "running".to_string(),
            config: entry.config.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ProxyManager for LocalProxyManager {
    async fn start(
        &self,
        id: &str,
        project: &ProjectPath,
        config: Value,
    ) -> Result<Value, WireError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(WireError::already_exists(format!("proxy exists: {id}")));
        }
        entries.insert(
            id.to_string(),
            ProxyEntry {
                project: project.clone(),
                config: config.clone(),
                overlay_rx: self.overlay.subscribe(),
            },
        );
        drop(entries);

        self.state.put_proxy(id, config.clone());
        info!(id, project = %project, "proxy registered");
        Ok(json!({"id": id, "project_path": project.to_string(), "status": "running"}))
    }

    async fn stop(&self, id: &str) -> Result<Value, WireError> {
        let removed = self
            .entries
            .lock()
            .remove(id)
            .ok_or_else(|| WireError::not_found(format!("proxy not found: {id}")))?;
        self.state.remove_proxy(id);
        info!(id, project = %removed.project, "proxy stopped");
        Ok(json!({"id": id, "status": "stopped"}))
    }

    async fn status(&self, id: &str) -> Result<Value, WireError> {
        let entries = self.entries.lock();
        let entry = entries
            .get(id)
            .ok_or_else(|| WireError::not_found(format!("proxy not found: {id}")))?;
        Ok(serde_json::to_value(self.info(id, entry)).unwrap_or_default())
    }

    async fn list(&self) -> Vec<ProxyInfo> {
        let entries = self.entries.lock();
        let mut infos: Vec<ProxyInfo> = entries
            .iter()
            .map(|(id, entry)| self.info(id, entry))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    async fn exec(&self, id: &str, _script: &str) -> Result<Value, WireError> {
        if !self.entries.lock().contains_key(id) {
            return Err(WireError::not_found(format!("proxy not found: {id}")));
        }
        // Script execution needs an attached browser page; the registry
        // facade has none.
        Err(WireError::invalid_state(format!(
            "proxy {id} has no attached page session"
        )))
    }

    async fn toast(&self, id: &str, _message: &str) -> Result<(), WireError> {
        if !self.entries.lock().contains_key(id) {
            return Err(WireError::not_found(format!("proxy not found: {id}")));
        }
        Ok(())
    }

    async fn stop_by_project(&self, project: &ProjectPath) -> Vec<String> {
        let ids: Vec<String> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, e)| e.project.matches(project))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &ids {
            let _ = self.stop(id).await;
        }
        ids
    }

    fn entries(&self) -> Vec<(String, ProjectPath)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, e)| (id.clone(), e.project.clone()))
            .collect()
    }
}

/// Bounded in-memory store for proxy traffic log entries.
pub struct ProxyLogStore {
    entries: Mutex<Vec<Value>>,
    capacity: usize,
    dropped: Mutex<u64>,
}

impl ProxyLogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity,
            dropped: Mutex::new(0),
        }
    }

    /// Append an entry, evicting the oldest past capacity.
    pub fn push(&self, entry: Value) {
        let mut entries = self.entries.lock();
        entries.push(entry);
        if entries.len() > self.capacity {
            let overflow = entries.len() - self.capacity;
            entries.drain(..overflow);
            *self.dropped.lock() += overflow as u64;
        }
    }

    /// Most recent `limit` entries (0 = all).
    pub fn query(&self, limit: usize) -> Vec<Value> {
        let entries = self.entries.lock();
        let start = if limit == 0 || limit >= entries.len() {
            0
        } else {
            entries.len() - limit
        };
        entries[start..].to_vec()
    }

    /// Clear the log; returns the number removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn stats(&self) -> Value {
        json!({
            "count": self.entries.lock().len(),
            "capacity": self.capacity,
            "dropped": *self.dropped.lock(),
        })
    }
}

/// Browser page sessions tracked by proxies, keyed by page id.
#[derive(Default)]
pub struct PageSessionStore {
    pages: Mutex<HashMap<String, Value>>,
}

impl PageSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: &str, page: Value) {
        self.pages.lock().insert(id.to_string(), page);
    }

    pub fn list(&self) -> Vec<Value> {
        let pages = self.pages.lock();
        let mut ids: Vec<&String> = pages.keys().collect();
        ids.sort();
        ids.iter().filter_map(|id| pages.get(*id).cloned()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.pages.lock().get(id).cloned()
    }

    pub fn clear(&self) -> usize {
        let mut pages = self.pages.lock();
        let n = pages.len();
        pages.clear();
        n
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
