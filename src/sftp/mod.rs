//! SFTP collection engine
//!
//! Remote sessions, filtered discovery, resumable copies with two-tier
//! retry, and the bounded-concurrency transfer scheduler.

pub mod enumerate;
pub mod error;
pub mod path_utils;
pub mod registry;
pub mod resume;
pub mod retry;
pub mod session;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use enumerate::{enumerate, enumerate_host};
pub use error::SftpError;
pub use registry::{TaskRegistry, TaskStatus, TransferTask};
pub use resume::{copy, copy_with_reconnect, CopyOptions, NoProgress, ProgressSink};
pub use retry::{is_connection_error, is_retryable_error, ErrorBudget, RetryPolicy};
pub use session::{
    RemoteReader, RemoteSession, SessionFactory, SessionState, SftpSession, SftpSessionFactory,
};
pub use transfer::{BatchResult, TransferControl, TransferOptions, TransferScheduler};
pub use types::*;
