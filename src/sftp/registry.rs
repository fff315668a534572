//! Transfer task registry
//!
//! Turns matched remote files into transfer tasks with unique local
//! destinations, and holds the task state the scheduler's workers update
//! concurrently. All state sits behind one lock; snapshots are copies.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::path_utils::{numbered_name, partial_path, remote_basename, sanitize_filename};
use super::types::FileEntry;

/// Task status. Transitions only move forward:
/// pending -> downloading -> completed | failed, or pending -> failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Downloading)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Downloading, TaskStatus::Completed)
                | (TaskStatus::Downloading, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote file to copy to one local destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    /// `task_<n>`, unique within the batch
    pub id: String,
    pub host_name: String,
    pub remote_path: String,
    /// Final destination, unique within the batch
    pub local_path: PathBuf,
    /// Size seen at enumeration time
    pub size: u64,
    pub status: TaskStatus,
    /// Bytes present in the partial artifact
    pub transferred: u64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferTask {
    /// Progress percentage (0-100)
    pub fn percentage(&self) -> u8 {
        match self.status {
            TaskStatus::Completed => 100,
            _ if self.size == 0 => 0,
            _ => ((self.transferred.min(self.size) * 100) / self.size) as u8,
        }
    }

    pub fn file_name(&self) -> &str {
        remote_basename(&self.remote_path)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    tasks: Vec<TransferTask>,
    index: HashMap<String, usize>,
    /// Local paths handed out in this batch
    claimed: HashSet<PathBuf>,
    total_size: u64,
    counter: u64,
    /// Hosts whose credentials were rejected during this batch
    failed_auth_hosts: HashSet<String>,
}

impl RegistryState {
    fn task_mut(&mut self, id: &str) -> Option<&mut TransferTask> {
        let idx = *self.index.get(id)?;
        self.tasks.get_mut(idx)
    }

    fn transition(&mut self, id: &str, next: TaskStatus) -> Option<&mut TransferTask> {
        let task = self.task_mut(id)?;
        if !task.status.can_transition_to(next) {
            warn!(
                "Ignoring status change {} -> {} for {}",
                task.status, next, task.id
            );
            return None;
        }
        task.status = next;
        if next.is_terminal() {
            task.finished_at = Some(Utc::now());
        }
        Some(task)
    }

    fn total_transferred(&self) -> u64 {
        self.tasks
            .iter()
            .map(|t| match t.status {
                TaskStatus::Completed => t.size,
                TaskStatus::Downloading => t.transferred,
                _ => 0,
            })
            .sum()
    }

    fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.contains(path) || path.exists()
    }
}

/// Shared, lock-guarded task registry. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transfer of `entry` from `host_name` and return the task id.
    ///
    /// The destination is `local_base/host_name/<sanitized basename>`. A name
    /// that already exists on disk or was handed out earlier in the batch gets
    /// a `_1`, `_2`, ... suffix before the extension.
    pub fn add_task(
        &self,
        host_name: &str,
        remote_path: &str,
        local_base: &Path,
        entry: &FileEntry,
    ) -> String {
        let basename = if entry.name.is_empty() {
            remote_basename(remote_path)
        } else {
            entry.name.as_str()
        };
        let file_name = sanitize_filename(basename);
        let dir = local_base.join(sanitize_filename(host_name));

        let mut state = self.state.lock();

        let mut local_path = dir.join(&file_name);
        let mut n = 1;
        while state.is_claimed(&local_path) {
            local_path = dir.join(numbered_name(&file_name, n));
            n += 1;
        }

        state.counter += 1;
        let id = format!("task_{}", state.counter);
        debug!(
            "Registered {} {}:{} -> {}",
            id,
            host_name,
            remote_path,
            local_path.display()
        );

        state.claimed.insert(local_path.clone());
        state.total_size += entry.size;
        let idx = state.tasks.len();
        state.index.insert(id.clone(), idx);
        state.tasks.push(TransferTask {
            id: id.clone(),
            host_name: host_name.to_string(),
            remote_path: remote_path.to_string(),
            local_path,
            size: entry.size,
            status: TaskStatus::Pending,
            transferred: 0,
            error: None,
            started_at: None,
            finished_at: None,
        });

        id
    }

    /// Drop every task and reset counters for a new batch
    pub fn clear(&self) {
        *self.state.lock() = RegistryState::default();
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    /// Sum of expected sizes of all registered tasks
    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    /// Copies of every task, in registration order
    pub fn snapshot(&self) -> Vec<TransferTask> {
        self.state.lock().tasks.clone()
    }

    pub fn get(&self, id: &str) -> Option<TransferTask> {
        let state = self.state.lock();
        state.index.get(id).and_then(|&i| state.tasks.get(i)).cloned()
    }

    /// Ids of tasks not yet dispatched
    pub fn pending_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Bytes of completed tasks plus in-flight bytes of downloading ones
    pub fn total_transferred(&self) -> u64 {
        self.state.lock().total_transferred()
    }

    /// Pending -> downloading. Returns false if the task was not pending.
    pub fn mark_downloading(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        match state.transition(id, TaskStatus::Downloading) {
            Some(task) => {
                task.started_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Record bytes in the partial artifact and return `(task, batch)` totals.
    ///
    /// Ignored unless the task is downloading.
    pub fn update_progress(&self, id: &str, transferred: u64) -> Option<(TransferTask, u64)> {
        let mut state = self.state.lock();
        let task = state.task_mut(id)?;
        if task.status != TaskStatus::Downloading {
            return None;
        }
        task.transferred = transferred;
        let task = task.clone();
        Some((task, state.total_transferred()))
    }

    pub fn mark_completed(&self, id: &str, bytes: u64) -> bool {
        let mut state = self.state.lock();
        match state.transition(id, TaskStatus::Completed) {
            Some(task) => {
                task.transferred = bytes;
                true
            }
            None => false,
        }
    }

    pub fn mark_failed(&self, id: &str, error: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.transition(id, TaskStatus::Failed) {
            Some(task) => {
                task.error = Some(error.into());
                true
            }
            None => false,
        }
    }

    /// Remember that `host_name` rejected our credentials
    pub fn mark_host_auth_failed(&self, host_name: &str) {
        self.state
            .lock()
            .failed_auth_hosts
            .insert(host_name.to_string());
    }

    pub fn is_host_auth_failed(&self, host_name: &str) -> bool {
        self.state.lock().failed_auth_hosts.contains(host_name)
    }

    /// Partial artifacts on disk for tasks that did not complete
    pub fn leftover_partials(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .map(|t| partial_path(&t.local_path))
            .filter(|p| p.exists())
            .collect()
    }
}
