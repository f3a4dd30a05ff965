// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphan reclamation for managed processes.
//!
//! Every spawn is recorded in an on-disk PID list; a clean shutdown drains
//! it. Entries found at startup therefore belong to a daemon that crashed,
//! and the processes behind them are reclaimed. PIDs are validated against
//! the kernel's process start time before killing, since a dead PID may
//! have been reused by an unrelated process.

use std::fs;
use std::path::{Path, PathBuf};

use agnt_core::ProjectPath;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::socket::{kill_group, process_exists};

/// One supervised PID, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub id: String,
    pub project_path: String,
    /// Kernel start time (clock ticks since boot) at spawn, for PID-reuse
    /// detection. `None` when /proc wasn't readable.
    #[serde(default)]
    pub start_ticks: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PidFile {
    version: u32,
    records: Vec<PidRecord>,
}

/// The live PID list, mirrored to disk on every change.
pub struct PidList {
    path: PathBuf,
    records: Mutex<Vec<PidRecord>>,
}

impl PidList {
    /// Open (or create) the PID list at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Record a spawned PID. Persistence is best-effort.
    pub fn record_spawn(&self, pid: u32, id: &str, project: &ProjectPath) {
        let record = PidRecord {
            pid,
            id: id.to_string(),
            project_path: project.to_string(),
            start_ticks: proc_start_ticks(pid),
        };
        let mut records = self.records.lock();
        records.retain(|r| r.pid != pid);
        records.push(record);
        self.save(&records);
    }

    /// Drop a PID on exit. Persistence is best-effort.
    pub fn record_exit(&self, pid: u32) {
        let mut records = self.records.lock();
        records.retain(|r| r.pid != pid);
        self.save(&records);
    }

    pub fn records(&self) -> Vec<PidRecord> {
        self.records.lock().clone()
    }

    fn save(&self, records: &[PidRecord]) {
        let file = PidFile {
            version: 1,
            records: records.to_vec(),
        };
        if let Err(e) = write_atomic(&self.path, &file) {
            warn!(error = %e, path = %self.path.display(), "failed to persist PID list");
        }
    }
}

fn load_records(path: &Path) -> Vec<PidRecord> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<PidFile>(&content) {
        Ok(file) => file.records,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "corrupt PID list, ignoring");
            Vec::new()
        }
    }
}

fn write_atomic(path: &Path, file: &PidFile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(file).map_err(std::io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Kernel start time for a PID, in clock ticks since boot.
///
/// Field 22 of `/proc/<pid>/stat`; the command name can contain spaces and
/// parentheses, so fields are counted from after the closing paren.
pub fn proc_start_ticks(pid: u32) -> Option<u64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    // after_comm starts at field 3 ("state"); starttime is field 22.
    after_comm.split_whitespace().nth(19)?.parse().ok()
}

/// Reclaim processes left behind by a crashed daemon.
///
/// Loads the PID list at `path`, terminates every recorded PID that is
/// still alive and whose start time matches the record, then truncates the
/// list. Mismatched start times mean the PID was reused; those are left
/// alone. Returns the PIDs that were reclaimed.
pub fn reclaim_orphans(path: &Path) -> Vec<u32> {
    let records = load_records(path);
    if records.is_empty() {
        return Vec::new();
    }

    let mut reclaimed = Vec::new();
    for record in &records {
        if !process_exists(record.pid) {
            continue;
        }
        let current_ticks = proc_start_ticks(record.pid);
        if record.start_ticks.is_some() && current_ticks != record.start_ticks {
            warn!(
                pid = record.pid,
                id = %record.id,
                "PID reused since crash, not reclaiming"
            );
            continue;
        }
        info!(pid = record.pid, id = %record.id, "reclaiming orphaned process");
        kill_group("TERM", record.pid);
        reclaimed.push(record.pid);
    }

    // Hard-kill stragglers after a short grace.
    if !reclaimed.is_empty() {
        std::thread::sleep(std::time::Duration::from_millis(500));
        for pid in &reclaimed {
            if process_exists(*pid) {
                kill_group("KILL", *pid);
            }
        }
    }

    let empty = PidFile {
        version: 1,
        records: Vec::new(),
    };
    if let Err(e) = write_atomic(path, &empty) {
        warn!(error = %e, "failed to truncate PID list after reclamation");
    }

    reclaimed
}

#[cfg(test)]
#[path = "orphans_tests.rs"]
mod tests;
