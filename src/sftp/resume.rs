//! Resumable file copy
//!
//! Bytes are streamed into `<local>.part` and the partial file is renamed to
//! its final name only once it holds exactly the remote size. A partial left
//! behind by an earlier run is picked up at its current length.
//!
//! Two recovery tiers wrap the copy, see [`super::retry`]:
//! - [`copy`] reopens the read stream after stream errors, on the same session;
//! - [`copy_with_reconnect`] reconnects the session after aborted attempts.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::error::SftpError;
use super::path_utils::partial_path;
use super::retry::{is_connection_error, is_retryable_error, RetryPolicy};
use super::session::{RemoteReader, RemoteSession};
use super::types::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_SYNC_INTERVAL};

/// Receives progress of a single copy
pub trait ProgressSink: Send + Sync {
    /// Called once, after the first successful connect
    fn started(&self) {}

    /// Bytes present in the partial artifact, out of `total`
    fn report(&self, transferred: u64, total: u64);
}

/// Sink that discards progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _transferred: u64, _total: u64) {}
}

/// Tunables for a single copy
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Bytes per read/write cycle
    pub chunk_size: usize,
    /// Force the partial file to disk after this many bytes
    pub sync_interval: u64,
    pub retry: RetryPolicy,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Copy `remote_path` to `local_path` over a connected session.
///
/// Returns the size of the completed file. On failure the partial artifact is
/// kept so a later call can resume from it.
pub async fn copy(
    session: &dyn RemoteSession,
    remote_path: &str,
    local_path: &Path,
    sink: &dyn ProgressSink,
    options: &CopyOptions,
) -> Result<u64, SftpError> {
    let part = partial_path(local_path);

    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SftpError::local_io(parent, e))?;
    }

    let existing = match fs::metadata(&part).await {
        Ok(meta) => Some(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(SftpError::local_io(&part, e)),
    };

    let total = session.stat(remote_path).await?.size;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&part)
        .await
        .map_err(|e| SftpError::local_io(&part, e))?;

    let offset = existing.unwrap_or(0);

    if existing.is_some() && offset >= total {
        // Partial already holds everything; finish the commit an earlier run missed
        if offset > total {
            file.set_len(total)
                .await
                .map_err(|e| SftpError::local_io(&part, e))?;
        }
        info!(
            "Partial {} already complete ({} bytes), committing",
            part.display(),
            total
        );
        sink.report(total, total);
        return commit(file, &part, local_path, total).await;
    }

    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| SftpError::local_io(&part, e))?;

    if offset > 0 {
        info!(
            "Resuming {} from offset {} of {}",
            remote_path, offset, total
        );
    } else {
        debug!("Starting download of {} ({} bytes)", remote_path, total);
    }

    let mut transferred = offset;
    sink.report(transferred, total);

    let mut budget = options.retry.inner_budget();
    let mut since_sync = 0u64;
    let mut buf = vec![0u8; options.chunk_size.max(1)];
    let mut stream: Option<RemoteReader> = None;
    let mut last_failure = String::new();

    while transferred < total {
        if stream.is_none() {
            match session.open_read(remote_path, transferred).await {
                Ok(reader) => stream = Some(reader),
                Err(SftpError::StreamError(msg)) => {
                    last_failure = msg;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(reader) = stream.as_mut() {
            let want = buf.len().min((total - transferred) as usize);
            match reader.read(&mut buf[..want]).await {
                Ok(0) => {
                    last_failure = format!(
                        "stream ended at {} of {} bytes",
                        transferred, total
                    );
                }
                Ok(n) => {
                    file.write_all(&buf[..n])
                        .await
                        .map_err(|e| SftpError::local_io(&part, e))?;
                    file.flush()
                        .await
                        .map_err(|e| SftpError::local_io(&part, e))?;

                    transferred += n as u64;
                    since_sync += n as u64;
                    if since_sync >= options.sync_interval {
                        file.sync_data()
                            .await
                            .map_err(|e| SftpError::local_io(&part, e))?;
                        since_sync = 0;
                    }

                    sink.report(transferred, total);
                    continue;
                }
                Err(e) => {
                    last_failure = e.to_string();
                }
            }
        }

        // Stream failed: drop it, back off, and reopen at the last written byte
        stream = None;
        let Some(count) = budget.spend() else {
            error!(
                "Giving up on {} after {} stream errors: {}",
                remote_path,
                budget.used(),
                last_failure
            );
            return Err(SftpError::StreamBudgetExhausted {
                errors: budget.used(),
                max: budget.max(),
                last: last_failure,
            });
        };

        let delay = options.retry.inner_backoff(count);
        warn!(
            "Stream error on {} at offset {} ({}/{}): {}, retrying in {:?}",
            remote_path,
            transferred,
            count,
            budget.max(),
            last_failure,
            delay
        );
        tokio::time::sleep(delay).await;

        file.set_len(transferred)
            .await
            .map_err(|e| SftpError::local_io(&part, e))?;
        file.seek(SeekFrom::Start(transferred))
            .await
            .map_err(|e| SftpError::local_io(&part, e))?;
    }

    drop(stream);
    commit(file, &part, local_path, transferred).await
}

/// Flush the partial file and atomically move it to its final name
async fn commit(
    mut file: fs::File,
    part: &Path,
    local_path: &Path,
    size: u64,
) -> Result<u64, SftpError> {
    file.flush()
        .await
        .map_err(|e| SftpError::local_io(part, e))?;
    file.sync_all()
        .await
        .map_err(|e| SftpError::local_io(part, e))?;
    drop(file);

    fs::rename(part, local_path)
        .await
        .map_err(|e| SftpError::local_io(local_path, e))?;

    info!("Saved {} ({} bytes)", local_path.display(), size);
    Ok(size)
}

/// Connect, copy, and reconnect after retryable failures.
///
/// Makes up to `max_outer_retries + 1` attempts, sleeping
/// `attempt * outer_backoff_unit` before each reconnect. The session is
/// disconnected when this returns.
pub async fn copy_with_reconnect(
    session: &mut dyn RemoteSession,
    remote_path: &str,
    local_path: &Path,
    sink: &dyn ProgressSink,
    options: &CopyOptions,
) -> Result<u64, SftpError> {
    let policy = &options.retry;
    let max_attempts = policy.max_attempts();
    let mut started = false;
    let mut last_error: Option<SftpError> = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = policy.outer_backoff(attempt);
            warn!(
                "Reconnecting to {} for {} in {:?} (attempt {}/{})",
                session.host().name,
                remote_path,
                delay,
                attempt + 1,
                max_attempts
            );
            tokio::time::sleep(delay).await;
        }

        let connected = if attempt == 0 {
            session.connect().await
        } else {
            session.reconnect().await
        };

        let result = match connected {
            Ok(()) => {
                if !started {
                    started = true;
                    sink.started();
                }
                copy(&*session, remote_path, local_path, sink, options).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(size) => {
                session.disconnect().await;
                return Ok(size);
            }
            Err(e) if is_retryable_error(&e) => {
                if is_connection_error(&e) {
                    warn!("Connection to {} lost: {}", session.host().name, e);
                } else {
                    warn!("Attempt {} for {} failed: {}", attempt + 1, remote_path, e);
                }
                last_error = Some(e);
            }
            Err(e) => {
                error!("Transfer of {} failed: {}", remote_path, e);
                session.disconnect().await;
                return Err(e);
            }
        }
    }

    session.disconnect().await;
    let last = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".to_string());
    error!(
        "Transfer of {} failed after {} attempts: {}",
        remote_path, max_attempts, last
    );
    Err(SftpError::RetriesExhausted {
        attempts: max_attempts,
        last,
    })
}
