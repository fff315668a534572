//! Remote session management
//!
//! A [`RemoteSession`] is one authenticated SFTP channel to one host. Sessions
//! are created per transfer task through a [`SessionFactory`] and owned by that
//! task for its whole lifetime; nothing here is shared between tasks.

use std::io::SeekFrom;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use russh::Disconnect;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::error::SftpError;
use super::path_utils::join_remote_path;
use super::types::{FileEntry, FileType};
use crate::ssh::{HostDescriptor, SshClient, SshHandle};

/// Byte stream positioned at the requested offset of a remote file
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; set only by [`RemoteSession::close`]
    Closed,
}

/// Primitives the enumerator and copy engine need from a remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Descriptor this session was created from
    fn host(&self) -> &HostDescriptor;

    fn state(&self) -> SessionState;

    /// Establish an authenticated channel with the descriptor's auth method.
    async fn connect(&mut self) -> Result<(), SftpError>;

    /// Release all protocol resources. No-op when not connected.
    async fn disconnect(&mut self);

    /// Best-effort disconnect followed by a fresh connect.
    async fn reconnect(&mut self) -> Result<(), SftpError> {
        self.disconnect().await;
        self.connect().await
    }

    /// Disconnect and refuse further connects.
    async fn close(&mut self);

    /// Immediate children of `path` (`.` and `..` excluded).
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>, SftpError>;

    async fn stat(&self, path: &str) -> Result<FileEntry, SftpError>;

    /// Open `path` for reading, positioned at `offset`.
    async fn open_read(&self, path: &str, offset: u64) -> Result<RemoteReader, SftpError>;
}

/// Creates unconnected sessions for a host.
pub trait SessionFactory: Send + Sync {
    fn create(&self, host: &HostDescriptor) -> Box<dyn RemoteSession>;
}

/// Factory for real SSH/SFTP sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct SftpSessionFactory;

impl SessionFactory for SftpSessionFactory {
    fn create(&self, host: &HostDescriptor) -> Box<dyn RemoteSession> {
        Box::new(SftpSession::new(host.clone()))
    }
}

/// Live protocol resources of a connected session
struct Connection {
    handle: SshHandle,
    sftp: RusshSftpSession,
    /// Remote home directory, used to expand `~`
    home: String,
}

/// SFTP session over a russh connection
pub struct SftpSession {
    host: HostDescriptor,
    state: SessionState,
    conn: Option<Connection>,
}

impl SftpSession {
    pub fn new(host: HostDescriptor) -> Self {
        Self {
            host,
            state: SessionState::Disconnected,
            conn: None,
        }
    }

    async fn open_connection(&self) -> Result<Connection, SftpError> {
        let handle = SshClient::new(self.host.clone()).connect().await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SftpError::ConnectionFailed(format!("Failed to open channel: {}", e)))?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SftpError::SubsystemNotAvailable(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SftpError::SubsystemNotAvailable(e.to_string()))?;

        let home = sftp
            .canonicalize(".")
            .await
            .map_err(|e| SftpError::ProtocolError(e.to_string()))?;

        Ok(Connection { handle, sftp, home })
    }

    fn connection(&self) -> Result<&Connection, SftpError> {
        match (&self.state, &self.conn) {
            (SessionState::Connected, Some(conn)) => Ok(conn),
            _ => Err(SftpError::NotConnected(self.host.name.clone())),
        }
    }

    /// Expand a leading `~` to the remote home directory
    fn resolve_path(conn: &Connection, path: &str) -> String {
        if path == "~" {
            conn.home.clone()
        } else if let Some(rest) = path.strip_prefix("~/") {
            join_remote_path(&conn.home, rest)
        } else {
            path.to_string()
        }
    }
}

#[async_trait]
impl RemoteSession for SftpSession {
    fn host(&self) -> &HostDescriptor {
        &self.host
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), SftpError> {
        match self.state {
            SessionState::Connected => return Ok(()),
            SessionState::Closed => {
                return Err(SftpError::NotConnected(format!(
                    "{} (session closed)",
                    self.host.name
                )))
            }
            _ => {}
        }

        self.state = SessionState::Connecting;
        match self.open_connection().await {
            Ok(conn) => {
                info!("SFTP subsystem opened for {}", self.host.name);
                self.conn = Some(conn);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.host.name, e);
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            let Connection { handle, sftp, .. } = conn;
            drop(sftp);
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("Ignoring disconnect error for {}: {}", self.host.name, e);
            }
            info!("Disconnected from {}", self.host.name);
        }
        if self.state != SessionState::Closed {
            self.state = SessionState::Disconnected;
        }
    }

    async fn close(&mut self) {
        self.disconnect().await;
        self.state = SessionState::Closed;
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        let conn = self.connection()?;
        let path = Self::resolve_path(conn, path);
        debug!("Listing directory: {}:{}", self.host.name, path);

        let read_dir = conn
            .sftp
            .read_dir(&path)
            .await
            .map_err(|e| map_sftp_error(e, &path))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let full_path = join_remote_path(&path, &name);
            entries.push(entry_from_attrs(name, full_path, &entry.metadata()));
        }

        debug!("Listed {} entries in {}", entries.len(), path);
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, SftpError> {
        let conn = self.connection()?;
        let path = Self::resolve_path(conn, path);

        let metadata = conn
            .sftp
            .metadata(&path)
            .await
            .map_err(|e| map_sftp_error(e, &path))?;

        let name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(entry_from_attrs(name, path, &metadata))
    }

    async fn open_read(&self, path: &str, offset: u64) -> Result<RemoteReader, SftpError> {
        let conn = self.connection()?;
        let path = Self::resolve_path(conn, path);

        let mut file = conn
            .sftp
            .open(&path)
            .await
            .map_err(|e| map_sftp_error(e, &path))?;

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| SftpError::StreamError(format!("seek to {}: {}", offset, e)))?;
            debug!("Seeked remote file {} to offset {}", path, offset);
        }

        Ok(Box::pin(file))
    }
}

fn entry_from_attrs(name: String, path: String, attrs: &FileAttributes) -> FileEntry {
    let file_type = if attrs.is_dir() {
        FileType::Directory
    } else if attrs.is_symlink() {
        FileType::Symlink
    } else if attrs.is_regular() {
        FileType::File
    } else {
        FileType::Unknown
    };

    FileEntry {
        name,
        path,
        file_type,
        size: attrs.size.unwrap_or(0),
        modified: attrs.mtime.map(|t| t as i64).unwrap_or(0),
    }
}

/// Map SFTP errors to our error type
fn map_sftp_error(err: SftpErrorInner, path: &str) -> SftpError {
    let err_str = err.to_string();
    let lower = err_str.to_lowercase();
    if lower.contains("no such file") || lower.contains("not found") {
        SftpError::FileNotFound(path.to_string())
    } else if lower.contains("permission denied") {
        SftpError::PermissionDenied(path.to_string())
    } else if lower.contains("timeout") || lower.contains("timed out") {
        SftpError::Timeout(err_str)
    } else if lower.contains("closed") || lower.contains("eof") || lower.contains("connection") {
        SftpError::ConnectionFailed(err_str)
    } else {
        SftpError::ProtocolError(err_str)
    }
}
