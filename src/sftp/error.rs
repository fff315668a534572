//! SFTP and transfer engine error types

use std::path::PathBuf;

use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("SFTP protocol error: {0}")]
    ProtocolError(String),

    #[error("SFTP subsystem not available: {0}")]
    SubsystemNotAvailable(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Local filesystem error at {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Enumeration of {host}:{path} failed: {reason}")]
    EnumerationFailed {
        host: String,
        path: String,
        reason: String,
    },

    #[error("Stream errors exceeded budget ({errors}/{max}): {last}")]
    StreamBudgetExhausted { errors: u32, max: u32, last: String },

    #[error("Transfer failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Not started: shutdown requested")]
    ShutdownRequested,
}

impl SftpError {
    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SftpError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

impl From<SshError> for SftpError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::AuthenticationFailed(msg) => SftpError::AuthenticationFailed(msg),
            SshError::KeyError(msg) => SftpError::AuthenticationFailed(msg),
            SshError::Timeout(msg) => SftpError::Timeout(msg),
            SshError::ConnectionFailed(msg) => SftpError::ConnectionFailed(msg),
            SshError::IoError(e) => SftpError::ConnectionFailed(e.to_string()),
            SshError::Disconnected => SftpError::ConnectionFailed("Disconnected".to_string()),
            SshError::ChannelError(msg) => SftpError::ConnectionFailed(msg),
            SshError::ProtocolError(msg) => SftpError::ProtocolError(msg),
        }
    }
}
