// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-project scheduler persistence.
//!
//! Each project carries its own `<project>/.agnt/scheduler.json` holding the
//! tasks scoped to it. Writes are atomic (temp + rename), so after any crash
//! the file is either the old version or the new one, never partial. A file
//! that fails to parse is quarantined to `.bak` and treated as empty.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::ScheduledTask;

/// Directory under the project root.
pub const SCHEDULER_DIR: &str = ".agnt";
/// File name inside [`SCHEDULER_DIR`].
pub const SCHEDULER_FILE: &str = "scheduler.json";

/// Errors from scheduler persistence.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct SchedulerFile {
    version: u32,
    tasks: Vec<ScheduledTask>,
}

/// Path of a project's scheduler file.
pub fn scheduler_path(project: &str) -> PathBuf {
    Path::new(project).join(SCHEDULER_DIR).join(SCHEDULER_FILE)
}

/// Load a project's tasks. Missing file is empty; corrupt is quarantined.
pub fn load_tasks(project: &str) -> Vec<ScheduledTask> {
    let path = scheduler_path(project);
    let Ok(content) = fs::read_to_string(&path) else {
        return Vec::new();
    };
    match serde_json::from_str::<SchedulerFile>(&content) {
        Ok(file) => file.tasks,
        Err(e) => {
            let bak = path.with_extension("json.bak");
            warn!(
                error = %e,
                path = %path.display(),
                "corrupt scheduler file, moving to .bak",
            );
            let _ = fs::rename(&path, &bak);
            Vec::new()
        }
    }
}

/// Save a project's tasks atomically.
pub fn save_tasks(project: &str, tasks: &[ScheduledTask]) -> Result<(), PersistError> {
    let path = scheduler_path(project);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = SchedulerFile {
        version: 1,
        tasks: tasks.to_vec(),
    };
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
