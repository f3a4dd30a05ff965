// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deferred message delivery.
//!
//! Tasks sit in a min-heap keyed by delivery time; a single dispatch task
//! sleeps until the head is due (or a schedule/cancel wakes it), resolves
//! the target session, and posts the message to its overlay. Cancellation
//! leaves a tombstone in the heap that is discarded lazily on pop. Every
//! mutation is persisted under the task's project so a crashed daemon
//! replays its backlog on the next start (at-least-once delivery).

pub mod persist;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agnt_core::{Clock, IdGen, ProjectPath, SessionCode, SystemClock, TaskId, UuidIdGen};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Delivered,
    Cancelled,
    Failed,
}

/// A deferred delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub session_code: SessionCode,
    pub project_path: ProjectPath,
    pub message: String,
    pub deliver_at_ms: u64,
    pub created_at_ms: u64,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task is not pending: {0}")]
    NotPending(String),

    #[error("message is empty")]
    EmptyMessage,
}

/// Resolves a session code to its overlay path at delivery time.
pub trait SessionResolver: Send + Sync {
    fn overlay_path_for(&self, code: &str) -> Option<String>;
}

impl<C: Clock> SessionResolver for crate::sessions::SessionRegistry<C> {
    fn overlay_path_for(&self, code: &str) -> Option<String> {
        self.get(code).map(|s| s.overlay_path.clone())
    }
}

/// Delivery seam, so the dispatch loop is testable without an overlay.
#[async_trait::async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, overlay_path: &str, message: &str) -> Result<(), String>;
}

/// Production deliverer: HTTP POST over the overlay's Unix socket.
pub struct OverlayDeliver;

#[async_trait::async_trait]
impl Deliver for OverlayDeliver {
    async fn deliver(&self, overlay_path: &str, message: &str) -> Result<(), String> {
        crate::overlay::post_text(overlay_path, message)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Heap entry: ordered by (deliver_at, insertion seq).
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    deliver_at_ms: u64,
    seq: u64,
    id: TaskId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deliver_at_ms, self.seq).cmp(&(other.deliver_at_ms, other.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    tasks: HashMap<TaskId, ScheduledTask>,
    seq: u64,
}

/// Scheduler counters, exposed via `INFO`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SchedulerCounters {
    pub pending: u64,
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// The deferred-delivery scheduler.
pub struct Scheduler<C: Clock = SystemClock, G: IdGen = UuidIdGen> {
    clock: C,
    idgen: G,
    inner: Mutex<Inner>,
    wake: Notify,
    delivered: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl Scheduler<SystemClock, UuidIdGen> {
    pub fn new() -> Self {
        Self::with_parts(SystemClock, UuidIdGen)
    }
}

impl Default for Scheduler<SystemClock, UuidIdGen> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock, G: IdGen> Scheduler<C, G> {
    pub fn with_parts(clock: C, idgen: G) -> Self {
        Self {
            clock,
            idgen,
            inner: Mutex::new(Inner::default()),
            wake: Notify::new(),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Schedule a message for delivery after `delay`.
    pub fn schedule(
        &self,
        session_code: &str,
        delay: Duration,
        message: &str,
        project: &ProjectPath,
    ) -> Result<ScheduledTask, SchedulerError> {
        if message.is_empty() {
            return Err(SchedulerError::EmptyMessage);
        }
        let now = self.clock.epoch_ms();
        let task = ScheduledTask {
            id: TaskId::new(self.idgen.next()),
            session_code: SessionCode::new(session_code),
            project_path: project.clone(),
            message: message.to_string(),
            deliver_at_ms: now + delay.as_millis() as u64,
            created_at_ms: now,
            status: TaskStatus::Pending,
            error: None,
        };

        {
            let mut inner = self.inner.lock();
            inner.seq += 1;
            let seq = inner.seq;
            inner.heap.push(Reverse(HeapEntry {
                deliver_at_ms: task.deliver_at_ms,
                seq,
                id: task.id.clone(),
            }));
            inner.tasks.insert(task.id.clone(), task.clone());
            self.persist_project(&inner, &task.project_path);
        }

        info!(
            task = %task.id,
            session = %task.session_code,
            deliver_at_ms = task.deliver_at_ms,
            "task scheduled"
        );
        self.wake.notify_one();
        Ok(task)
    }

    /// Cancel a pending task. Its heap entry becomes a tombstone.
    pub fn cancel(&self, id: &str) -> Result<ScheduledTask, SchedulerError> {
        let cancelled = {
            let mut inner = self.inner.lock();
            let task = inner
                .tasks
                .get(id)
                .cloned()
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            if task.status != TaskStatus::Pending {
                return Err(SchedulerError::NotPending(id.to_string()));
            }
            inner.tasks.remove(id);
            self.persist_project(&inner, &task.project_path);
            task
        };

        self.cancelled.fetch_add(1, Ordering::SeqCst);
        info!(task = %cancelled.id, "task cancelled");
        self.wake.notify_one();
        Ok(ScheduledTask {
            status: TaskStatus::Cancelled,
            ..cancelled
        })
    }

    /// List tasks, filtered by project unless `global` is set.
    pub fn list_tasks(&self, project: &ProjectPath, global: bool) -> Vec<ScheduledTask> {
        let inner = self.inner.lock();
        let mut tasks: Vec<ScheduledTask> = inner
            .tasks
            .values()
            .filter(|t| global || t.project_path.matches(project))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.deliver_at_ms, t.id.as_str().to_string()));
        tasks
    }

    /// Load a project's persisted tasks back into the scheduler.
    ///
    /// Pending tasks re-enter the heap; ones already past due will fire on
    /// the next loop iteration (at-least-once replay). Terminal tasks are
    /// kept for listing only. Returns how many pending tasks were loaded.
    pub fn register_project(&self, project: &ProjectPath) -> usize {
        if project.is_unbound() {
            return 0;
        }
        let loaded = persist::load_tasks(project);
        if loaded.is_empty() {
            return 0;
        }

        let mut pending = 0;
        {
            let mut inner = self.inner.lock();
            for task in loaded {
                if inner.tasks.contains_key(&task.id) {
                    continue;
                }
                if task.status == TaskStatus::Pending {
                    inner.seq += 1;
                    let seq = inner.seq;
                    inner.heap.push(Reverse(HeapEntry {
                        deliver_at_ms: task.deliver_at_ms,
                        seq,
                        id: task.id.clone(),
                    }));
                    pending += 1;
                }
                inner.tasks.insert(task.id.clone(), task);
            }
        }

        if pending > 0 {
            info!(project = %project, pending, "replaying persisted tasks");
            self.wake.notify_one();
        }
        pending
    }

    pub fn counters(&self) -> SchedulerCounters {
        let pending = self
            .inner
            .lock()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count() as u64;
        SchedulerCounters {
            pending,
            delivered: self.delivered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }

    /// Milliseconds until the head entry is due (`None` = heap empty).
    fn next_delay_ms(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        // Discard tombstones so they don't cause spurious wakeups.
        while let Some(Reverse(head)) = inner.heap.peek() {
            let live = inner
                .tasks
                .get(&head.id)
                .map(|t| t.status == TaskStatus::Pending)
                .unwrap_or(false);
            if live {
                let deliver_at = head.deliver_at_ms;
                return Some(deliver_at.saturating_sub(self.clock.epoch_ms()));
            }
            inner.heap.pop();
        }
        None
    }

    /// Pop every task due now. Holds the lock only to pop.
    fn pop_due(&self) -> Vec<ScheduledTask> {
        let now = self.clock.epoch_ms();
        let mut due = Vec::new();
        let mut inner = self.inner.lock();
        while let Some(Reverse(head)) = inner.heap.peek() {
            if head.deliver_at_ms > now {
                break;
            }
            let id = match inner.heap.pop() {
                Some(Reverse(entry)) => entry.id,
                None => break,
            };
            // Tombstones: cancelled tasks were removed from the map.
            if let Some(task) = inner.tasks.get(&id) {
                if task.status == TaskStatus::Pending {
                    due.push(task.clone());
                }
            }
        }
        due
    }

    fn finish_task(&self, id: &TaskId, status: TaskStatus, error: Option<String>) {
        let mut inner = self.inner.lock();
        let project = match inner.tasks.get_mut(id) {
            Some(task) => {
                task.status = status;
                task.error = error;
                task.project_path.clone()
            }
            None => return,
        };
        self.persist_project(&inner, &project);
        match status {
            TaskStatus::Delivered => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
            TaskStatus::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    /// Persist every task scoped to a project. Failures are logged; the
    /// in-memory scheduler stays authoritative for this run.
    fn persist_project(&self, inner: &Inner, project: &ProjectPath) {
        if project.is_unbound() {
            return;
        }
        let tasks: Vec<ScheduledTask> = inner
            .tasks
            .values()
            .filter(|t| t.project_path.matches(project))
            .cloned()
            .collect();
        if let Err(e) = persist::save_tasks(project, &tasks) {
            warn!(error = %e, project = %project, "failed to persist scheduler state");
        }
    }

    /// Deliver everything due right now. Exposed for the dispatch loop and
    /// for tests that drive time manually.
    pub async fn deliver_due<R, D>(&self, resolver: &R, deliver: &D)
    where
        R: SessionResolver + ?Sized,
        D: Deliver + ?Sized,
    {
        for task in self.pop_due() {
            let Some(overlay_path) = resolver.overlay_path_for(task.session_code.as_str()) else {
                warn!(task = %task.id, session = %task.session_code, "session gone, task failed");
                self.finish_task(&task.id, TaskStatus::Failed, Some("session not found".into()));
                continue;
            };

            match deliver.deliver(&overlay_path, &task.message).await {
                Ok(()) => {
                    debug!(task = %task.id, session = %task.session_code, "task delivered");
                    self.finish_task(&task.id, TaskStatus::Delivered, None);
                }
                Err(e) => {
                    // No automatic retry: at-least-once semantics let the
                    // caller reschedule.
                    warn!(task = %task.id, error = %e, "task delivery failed");
                    self.finish_task(&task.id, TaskStatus::Failed, Some(e));
                }
            }
        }
    }

    /// Dispatch loop: sleep until the head is due or a mutation wakes us.
    pub async fn run<R, D>(self: Arc<Self>, resolver: Arc<R>, deliver: Arc<D>, shutdown: Arc<Notify>)
    where
        R: SessionResolver + ?Sized + 'static,
        D: Deliver + ?Sized + 'static,
    {
        loop {
            let delay_ms = self.next_delay_ms();
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = self.wake.notified() => {
                    // Heap changed; recompute the deadline.
                    continue;
                }
                _ = sleep_or_park(delay_ms) => {
                    self.deliver_due(&*resolver, &*deliver).await;
                }
            }
        }
        debug!("scheduler dispatch loop stopped");
    }
}

async fn sleep_or_park(delay_ms: Option<u64>) {
    match delay_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => std::future::pending::<()>().await,
    }
}

/// Parse a human duration: `"500ms"`, `"2s"`, `"5m"`, `"1h"`, or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = number.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
