//! SFTP data types

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Remote file entry produced by listing and enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name (not full path)
    pub name: String,
    /// Full remote path
    pub path: String,
    /// File type
    pub file_type: FileType,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (Unix timestamp, seconds)
    pub modified: i64,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.modified, 0).single()
    }
}

/// File type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One configured remote directory to collect from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySpec {
    /// Name of the host this directory lives on
    pub host_name: String,
    /// Remote root path
    pub path: String,
    /// Shell glob matched against file basenames
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Descend into subdirectories
    #[serde(default)]
    pub recursive: bool,
}

impl DirectorySpec {
    pub fn new(host_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            path: path.into(),
            pattern: default_pattern(),
            recursive: false,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

pub(crate) fn default_pattern() -> String {
    "*".to_string()
}

/// Inclusive modification-time window; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Both bounds are inclusive.
    pub fn contains(&self, mtime: i64) -> bool {
        if let Some(start) = self.start {
            if mtime < start.timestamp() {
                return false;
            }
        }
        if let Some(end) = self.end {
            if mtime > end.timestamp() {
                return false;
            }
        }
        true
    }
}

/// Transfer progress event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Task ID
    pub id: String,
    /// Host the file comes from
    pub host_name: String,
    /// Remote file path
    pub remote_path: String,
    /// Bytes written to the partial artifact so far
    pub transferred_bytes: u64,
    /// Total bytes to transfer
    pub total_bytes: u64,
    /// Bytes across the whole batch (completed + in flight)
    pub batch_transferred: u64,
    /// Total bytes of the batch
    pub batch_total: u64,
}

impl TransferProgress {
    /// Calculate progress percentage (0-100)
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// Constants for SFTP transfers
pub mod constants {
    /// Default chunk size for file transfers (32 KB)
    pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

    /// Force a durability flush of the partial artifact this often (4 MB)
    pub const DEFAULT_SYNC_INTERVAL: u64 = 4 * 1024 * 1024;

    /// Default concurrent transfers
    pub const DEFAULT_CONCURRENT_TRANSFERS: usize = 5;

    /// Upper bound for concurrent transfers
    pub const MAX_CONCURRENT_TRANSFERS: usize = 64;

    /// Suffix of in-flight download files
    pub const PARTIAL_SUFFIX: &str = ".part";

    /// Longest sanitized local file name, in characters
    pub const MAX_FILE_NAME_LEN: usize = 200;

    /// Capacity of the progress event channel
    pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;
}
