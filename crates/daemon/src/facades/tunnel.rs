// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tunnel facade.
//!
//! Tunnel providers are external CLIs that print a public URL; spawning and
//! URL scraping live outside the core. The daemon keeps the project-scoped
//! registry so tunnels participate in scoped lookup and cleanup.

use std::collections::HashMap;

use agnt_core::{ProjectPath, WireError};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

/// Tunnel control surface used by the dispatcher.
#[async_trait::async_trait]
pub trait TunnelManager: Send + Sync {
    async fn start(
        &self,
        id: &str,
        project: &ProjectPath,
        config: Value,
    ) -> Result<Value, WireError>;
    async fn stop(&self, id: &str) -> Result<Value, WireError>;
    async fn status(&self, id: &str) -> Result<Value, WireError>;
    async fn list(&self) -> Vec<TunnelInfo>;
    async fn stop_by_project(&self, project: &ProjectPath) -> Vec<String>;
    /// `(id, project)` pairs for fuzzy resolution.
    fn entries(&self) -> Vec<(String, ProjectPath)>;
}

/// Registry entry snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelInfo {
    pub id: String,
    pub project_path: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub config: Value,
}

struct TunnelEntry {
    project: ProjectPath,
    config: Value,
    url: Option<String>,
}

/// In-daemon tunnel registry.
#[derive(Default)]
pub struct LocalTunnelManager {
    entries: Mutex<HashMap<String, TunnelEntry>>,
}

impl LocalTunnelManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn info(id: &str, entry: &TunnelEntry) -> TunnelInfo {
        TunnelInfo {
            id: id.to_string(),
            project_path: entry.project.to_string(),
            status: if entry.url.is_some() {
                "connected".to_string()
            } else {
                "starting".to_string()
            },
            url: entry.url.clone(),
            config: entry.config.clone(),
        }
    }
}

#[async_trait::async_trait]
impl TunnelManager for LocalTunnelManager {
    async fn start(
        &self,
        id: &str,
        project: &ProjectPath,
        config: Value,
    ) -> Result<Value, WireError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(WireError::already_exists(format!("tunnel exists: {id}")));
        }
        let url = config
            .get("url")
            .and_then(|v| v.as_str())
            .map(String::from);
        entries.insert(
            id.to_string(),
            TunnelEntry {
                project: project.clone(),
                config,
                url,
            },
        );
        info!(id, project = %project, "tunnel registered");
        Ok(json!({"id": id, "status": "starting"}))
    }

    async fn stop(&self, id: &str) -> Result<Value, WireError> {
        self.entries
            .lock()
            .remove(id)
            .ok_or_else(|| WireError::not_found(format!("tunnel not found: {id}")))?;
        info!(id, "tunnel stopped");
        Ok(json!({"id": id, "status": "stopped"}))
    }

    async fn status(&self, id: &str) -> Result<Value, WireError> {
        let entries = self.entries.lock();
        let entry = entries
            .get(id)
            .ok_or_else(|| WireError::not_found(format!("tunnel not found: {id}")))?;
        Ok(serde_json::to_value(Self::info(id, entry)).unwrap_or_default())
    }

    async fn list(&self) -> Vec<TunnelInfo> {
        let entries = self.entries.lock();
        let mut infos: Vec<TunnelInfo> = entries
            .iter()
            .map(|(id, entry)| Self::info(id, entry))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    async fn stop_by_project(&self, project: &ProjectPath) -> Vec<String> {
        let mut entries = self.entries.lock();
        let ids: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.project.matches(project))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            entries.remove(id);
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
