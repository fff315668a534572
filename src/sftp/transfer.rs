//! Transfer scheduler
//!
//! Runs the tasks of a [`TaskRegistry`] on a bounded pool of workers. Each
//! worker owns its own session for the whole task; the registry is the only
//! state shared between workers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::SftpError;
use super::registry::{TaskRegistry, TaskStatus, TransferTask};
use super::resume::{copy_with_reconnect, CopyOptions, ProgressSink};
use super::retry::RetryPolicy;
use super::session::SessionFactory;
use super::types::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENT_TRANSFERS, DEFAULT_SYNC_INTERVAL,
    MAX_CONCURRENT_TRANSFERS,
};
use super::types::TransferProgress;
use crate::ssh::HostDescriptor;

/// Batch shutdown signal
#[derive(Debug)]
pub struct TransferControl {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Stop dispatching new tasks. Tasks already running finish normally.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get a receiver for waiting on shutdown
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch-wide transfer settings
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Root of the local download tree
    pub local_base: PathBuf,
    pub max_concurrent: usize,
    pub chunk_size: usize,
    pub sync_interval: u64,
    pub retry: RetryPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            local_base: PathBuf::from("./downloads"),
            max_concurrent: DEFAULT_CONCURRENT_TRANSFERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferOptions {
    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            chunk_size: self.chunk_size,
            sync_interval: self.sync_interval,
            retry: self.retry.clone(),
        }
    }
}

/// Outcome of one scheduler run
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// True iff no task failed
    pub success: bool,
    pub completed: usize,
    pub failed: usize,
    pub total_files: usize,
    pub total_size: u64,
    pub total_transferred: u64,
    /// `host: path: error` for each failed task, in registration order
    pub errors: Vec<String>,
    /// Terminal snapshot of every task
    pub tasks: Vec<TransferTask>,
}

impl BatchResult {
    fn from_tasks(tasks: Vec<TransferTask>, total_size: u64, total_transferred: u64) -> Self {
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let errors: Vec<String> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| {
                format!(
                    "{}: {}: {}",
                    t.host_name,
                    t.remote_path,
                    t.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        let failed = errors.len();

        Self {
            success: failed == 0,
            completed,
            failed,
            total_files: tasks.len(),
            total_size,
            total_transferred,
            errors,
            tasks,
        }
    }
}

/// Bounded-concurrency executor for a batch of transfer tasks
pub struct TransferScheduler {
    factory: Arc<dyn SessionFactory>,
    hosts: HashMap<String, HostDescriptor>,
    options: TransferOptions,
    control: Arc<TransferControl>,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
}

impl TransferScheduler {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        hosts: impl IntoIterator<Item = HostDescriptor>,
        options: TransferOptions,
    ) -> Self {
        let hosts = hosts.into_iter().map(|h| (h.name.clone(), h)).collect();
        Self {
            factory,
            hosts,
            options,
            control: Arc::new(TransferControl::new()),
            progress_tx: None,
        }
    }

    /// Emit [`TransferProgress`] events on a bounded channel.
    ///
    /// Events are dropped when the channel is full; the registry stays the
    /// source of truth.
    pub fn with_progress_channel(
        mut self,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<TransferProgress>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.progress_tx = Some(tx);
        (self, rx)
    }

    /// Shared handle for requesting shutdown
    pub fn control(&self) -> Arc<TransferControl> {
        self.control.clone()
    }

    /// Run every pending task in `registry` and wait for all of them.
    pub async fn execute(&self, registry: &TaskRegistry) -> BatchResult {
        let ids = registry.pending_ids();
        let total_size = registry.total_size();
        let max_concurrent = self.options.max_concurrent.clamp(1, MAX_CONCURRENT_TRANSFERS);

        if ids.is_empty() {
            info!("No transfers to run");
        } else {
            info!(
                "Starting {} transfers ({} bytes) with {} workers",
                ids.len(),
                total_size,
                max_concurrent
            );
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let copy_options = self.options.copy_options();
        let mut shutdown_rx = self.control.subscribe();
        let mut workers = JoinSet::new();

        for id in ids {
            let permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if self.control.is_shutdown() {
                break;
            }

            let Some(task) = registry.get(&id) else {
                continue;
            };
            let worker = Worker {
                registry: registry.clone(),
                factory: self.factory.clone(),
                host: self.hosts.get(&task.host_name).cloned(),
                options: copy_options.clone(),
                progress_tx: self.progress_tx.clone(),
                batch_total: total_size,
            };

            debug!("Dispatching {} ({})", task.id, task.remote_path);
            workers.spawn(async move {
                let _permit = permit;
                worker.run(task).await;
            });
        }

        if self.control.is_shutdown() {
            warn!("Shutdown requested, waiting for running transfers");
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Transfer worker terminated abnormally: {}", e);
            }
        }

        // Anything not terminal now was never dispatched or lost its worker
        for task in registry.snapshot() {
            match task.status {
                TaskStatus::Pending => {
                    registry.mark_failed(&task.id, SftpError::ShutdownRequested.to_string());
                }
                TaskStatus::Downloading => {
                    registry.mark_failed(&task.id, "transfer worker terminated unexpectedly");
                }
                _ => {}
            }
        }

        let result =
            BatchResult::from_tasks(registry.snapshot(), total_size, registry.total_transferred());
        info!(
            "Transfers finished: {} completed, {} failed, {} bytes",
            result.completed, result.failed, result.total_transferred
        );
        result
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        // Sender gone: shutdown can no longer be requested
        std::future::pending::<()>().await;
    }
}

/// Everything one worker needs, owned
struct Worker {
    registry: TaskRegistry,
    factory: Arc<dyn SessionFactory>,
    host: Option<HostDescriptor>,
    options: CopyOptions,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
    batch_total: u64,
}

impl Worker {
    async fn run(self, task: TransferTask) {
        let Some(host) = self.host.as_ref() else {
            error!("{}: no configuration for host {}", task.id, task.host_name);
            self.registry
                .mark_failed(&task.id, format!("Unknown host: {}", task.host_name));
            return;
        };

        if self.registry.is_host_auth_failed(&host.name) {
            warn!(
                "Skipping {}: authentication to {} failed earlier in this batch",
                task.remote_path, host.name
            );
            self.registry.mark_failed(
                &task.id,
                format!("Skipped: authentication to {} failed", host.name),
            );
            return;
        }

        let sink = TaskProgress {
            id: task.id.clone(),
            host_name: task.host_name.clone(),
            remote_path: task.remote_path.clone(),
            registry: self.registry.clone(),
            progress_tx: self.progress_tx.clone(),
            batch_total: self.batch_total,
        };

        let mut session = self.factory.create(host);
        let result = copy_with_reconnect(
            session.as_mut(),
            &task.remote_path,
            &task.local_path,
            &sink,
            &self.options,
        )
        .await;
        session.close().await;

        match result {
            Ok(bytes) => {
                self.registry.mark_completed(&task.id, bytes);
                info!(
                    "Successfully transferred {} to {}",
                    task.remote_path,
                    task.local_path.display()
                );
            }
            Err(e) => {
                if matches!(e, SftpError::AuthenticationFailed(_)) {
                    self.registry.mark_host_auth_failed(&host.name);
                }
                error!("Transfer failed for {}: {}", task.remote_path, e);
                self.registry.mark_failed(&task.id, e.to_string());
            }
        }
    }
}

/// Routes copy progress into the registry and the optional event channel
struct TaskProgress {
    id: String,
    host_name: String,
    remote_path: String,
    registry: TaskRegistry,
    progress_tx: Option<mpsc::Sender<TransferProgress>>,
    batch_total: u64,
}

impl ProgressSink for TaskProgress {
    fn started(&self) {
        self.registry.mark_downloading(&self.id);
    }

    fn report(&self, transferred: u64, total: u64) {
        let Some((_, batch_transferred)) = self.registry.update_progress(&self.id, transferred)
        else {
            return;
        };

        if let Some(tx) = &self.progress_tx {
            // Drop the event rather than stall the transfer
            let _ = tx.try_send(TransferProgress {
                id: self.id.clone(),
                host_name: self.host_name.clone(),
                remote_path: self.remote_path.clone(),
                transferred_bytes: transferred,
                total_bytes: total,
                batch_transferred,
                batch_total: self.batch_total,
            });
        }
    }
}
