//! Configuration types
//!
//! The collector is configured with a single JSON file listing servers, the
//! directories to collect from each server, and batch settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sftp::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_SYNC_INTERVAL};
use crate::sftp::{DirectorySpec, RetryPolicy, TransferOptions};
use crate::ssh::{default_port, default_timeout, AuthMethod, HostDescriptor};

/// One SSH server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Private key path; takes precedence over `password`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Connect timeout in seconds; falls back to `settings.connection_timeout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl ServerConfig {
    /// Authentication method, or `None` if neither key nor password is set
    pub fn auth(&self) -> Option<AuthMethod> {
        if let Some(key) = self.key_file.as_deref().filter(|k| !k.is_empty()) {
            return Some(AuthMethod::Key {
                key_path: key.to_string(),
                passphrase: self.passphrase.clone(),
            });
        }
        self.password
            .as_deref()
            .map(|password| AuthMethod::password(password))
    }
}

/// One remote directory to collect from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub name: String,
    pub path: String,
    /// Name of the server this directory lives on
    pub server: String,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default)]
    pub recursive: bool,
}

impl DirectoryConfig {
    pub fn to_spec(&self) -> DirectorySpec {
        DirectorySpec::new(&self.server, &self.path)
            .with_pattern(&self.file_pattern)
            .recursive(self.recursive)
    }
}

fn default_file_pattern() -> String {
    "*".to_string()
}

/// Batch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_download_path")]
    pub default_download_path: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    /// Reconnects per file after the first attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_timeout")]
    pub connection_timeout: u64,
    /// Stream errors tolerated per copy attempt
    #[serde(default = "default_max_inner_errors")]
    pub max_inner_errors: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_download_path() -> String {
    "./downloads".to_string()
}

fn default_max_concurrent() -> usize {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_max_inner_errors() -> u32 {
    5
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_download_path: default_download_path(),
            max_concurrent_transfers: default_max_concurrent(),
            retry_attempts: default_retry_attempts(),
            connection_timeout: default_timeout(),
            max_inner_errors: default_max_inner_errors(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Root of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
    #[serde(default)]
    pub settings: Settings,
}

impl CollectorConfig {
    /// Template written when no configuration file exists
    pub fn template() -> Self {
        Self {
            servers: vec![
                ServerConfig {
                    name: "Production Server 1".to_string(),
                    host: "192.168.1.100".to_string(),
                    port: 22,
                    username: "your_username".to_string(),
                    password: Some("your_password".to_string()),
                    key_file: None,
                    passphrase: None,
                    timeout: Some(30),
                },
                ServerConfig {
                    name: "Development Server".to_string(),
                    host: "192.168.1.101".to_string(),
                    port: 22,
                    username: "dev_user".to_string(),
                    password: None,
                    key_file: Some("~/.ssh/id_rsa".to_string()),
                    passphrase: None,
                    timeout: Some(30),
                },
            ],
            directories: vec![
                DirectoryConfig {
                    name: "Application Logs".to_string(),
                    path: "/var/log/myapp".to_string(),
                    server: "Production Server 1".to_string(),
                    file_pattern: "*.log".to_string(),
                    recursive: true,
                },
                DirectoryConfig {
                    name: "System Logs".to_string(),
                    path: "/var/log".to_string(),
                    server: "Production Server 1".to_string(),
                    file_pattern: "*.log".to_string(),
                    recursive: false,
                },
                DirectoryConfig {
                    name: "Dev Application Logs".to_string(),
                    path: "/home/dev/logs".to_string(),
                    server: "Development Server".to_string(),
                    file_pattern: "*.log".to_string(),
                    recursive: true,
                },
            ],
            settings: Settings::default(),
        }
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Connection descriptors for every server that has credentials
    pub fn host_descriptors(&self) -> Vec<HostDescriptor> {
        self.servers
            .iter()
            .filter_map(|server| {
                let auth = server.auth()?;
                Some(
                    HostDescriptor::new(&server.name, &server.host, &server.username, auth)
                        .with_port(server.port)
                        .with_timeout(server.timeout.unwrap_or(self.settings.connection_timeout)),
                )
            })
            .collect()
    }

    /// Directories configured for `server`, in file order
    pub fn directories_for(&self, server: &str) -> Vec<DirectorySpec> {
        self.directories
            .iter()
            .filter(|d| d.server == server)
            .map(DirectoryConfig::to_spec)
            .collect()
    }

    /// Scheduler options derived from `settings`
    pub fn transfer_options(&self) -> TransferOptions {
        let s = &self.settings;
        TransferOptions {
            local_base: PathBuf::from(&s.default_download_path),
            max_concurrent: s.max_concurrent_transfers,
            chunk_size: s.chunk_size,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            retry: RetryPolicy::new(s.retry_attempts, s.max_inner_errors),
        }
    }
}
