//! Configuration Storage
//!
//! Reads, validates and writes the collector's JSON configuration file.
//! A missing file is replaced by an editable template.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::types::CollectorConfig;

/// Default configuration file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Created default configuration at {0}; edit it and run again")]
    CreatedDefault(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Expand a leading `~` to the local home directory
pub fn expand_tilde(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.display(), rest),
        None => path.to_string(),
    }
}

/// Check a parsed configuration and normalize it.
///
/// Key paths are `~`-expanded. Directories that point at unknown servers are
/// dropped with a warning.
pub fn validate(mut config: CollectorConfig) -> Result<CollectorConfig, ConfigError> {
    if config.servers.is_empty() {
        return Err(ConfigError::Invalid("no servers configured".to_string()));
    }

    let mut names = HashSet::new();
    for (i, server) in config.servers.iter_mut().enumerate() {
        if server.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("server {}: missing name", i + 1)));
        }
        if !names.insert(server.name.clone()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate server name '{}'",
                server.name
            )));
        }
        if server.host.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "server '{}': missing host",
                server.name
            )));
        }
        if server.username.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "server '{}': missing username",
                server.name
            )));
        }
        if let Some(key) = server.key_file.as_mut() {
            *key = expand_tilde(key);
        }
        if server.auth().is_none() {
            return Err(ConfigError::Invalid(format!(
                "server '{}': no authentication method (set password or key_file)",
                server.name
            )));
        }
    }

    for (i, dir) in config.directories.iter().enumerate() {
        if dir.path.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "directory {} ('{}'): missing path",
                i + 1,
                dir.name
            )));
        }
    }

    config.directories.retain(|dir| {
        let known = names.contains(&dir.server);
        if !known {
            warn!(
                "Directory '{}' references unknown server '{}', ignoring",
                dir.name, dir.server
            );
        }
        known
    });

    if config.settings.max_concurrent_transfers == 0 {
        warn!("max_concurrent_transfers is 0, using 1");
        config.settings.max_concurrent_transfers = 1;
    }
    if config.settings.chunk_size == 0 {
        return Err(ConfigError::Invalid("chunk_size must be positive".to_string()));
    }

    Ok(config)
}

/// Configuration storage manager
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Storage for `config.json` in the working directory
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Create storage manager with custom path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load and validate the configuration.
    ///
    /// A missing file is replaced by [`CollectorConfig::template`] and
    /// reported as [`ConfigError::CreatedDefault`].
    pub async fn load(&self) -> Result<CollectorConfig, ConfigError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.save(&CollectorConfig::template()).await?;
                info!("Wrote configuration template to {}", self.path.display());
                return Err(ConfigError::CreatedDefault(self.path.clone()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config: CollectorConfig = serde_json::from_str(&contents)?;
        let config = validate(config)?;
        info!(
            "Configuration loaded from {}: {} servers, {} directories",
            self.path.display(),
            config.servers.len(),
            config.directories.len()
        );
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self, config: &CollectorConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        // Write to temp file first, then rename (atomic write)
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    /// Get config file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DirectoryConfig, ServerConfig};
    use tempfile::tempdir;

    fn server(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            host: "10.0.0.1".to_string(),
            port: 22,
            username: "ops".to_string(),
            password: Some("pw".to_string()),
            key_file: None,
            passphrase: None,
            timeout: None,
        }
    }

    fn directory(server: &str) -> DirectoryConfig {
        DirectoryConfig {
            name: format!("{} logs", server),
            path: "/var/log".to_string(),
            server: server.to_string(),
            file_pattern: "*".to_string(),
            recursive: false,
        }
    }

    #[tokio::test]
    async fn test_missing_file_writes_template() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        let storage = ConfigStorage::with_path(&path);

        let err = storage.load().await.unwrap_err();
        assert!(matches!(err, ConfigError::CreatedDefault(ref p) if p == &path));
        assert!(path.exists());

        // The template itself is a valid configuration
        let config = storage.load().await.unwrap();
        assert_eq!(config, validate(CollectorConfig::template()).unwrap());
        assert_eq!(config.directories.len(), 3);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("nested").join("c.json"));

        let mut config = CollectorConfig::default();
        config.servers.push(server("web"));
        config.directories.push(directory("web"));
        config.settings.max_concurrent_transfers = 2;

        storage.save(&config).await.unwrap();
        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ConfigStorage::with_path(&path).load().await.unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_validation_rejects_bad_servers() {
        assert!(matches!(
            validate(CollectorConfig::default()),
            Err(ConfigError::Invalid(_))
        ));

        let mut dup = CollectorConfig::default();
        dup.servers = vec![server("web"), server("web")];
        assert!(matches!(validate(dup), Err(ConfigError::Invalid(m)) if m.contains("duplicate")));

        let mut no_auth = CollectorConfig::default();
        let mut s = server("web");
        s.password = None;
        no_auth.servers.push(s);
        assert!(matches!(validate(no_auth), Err(ConfigError::Invalid(m)) if m.contains("authentication")));

        let mut no_host = CollectorConfig::default();
        let mut s = server("web");
        s.host = " ".to_string();
        no_host.servers.push(s);
        assert!(validate(no_host).is_err());
    }

    #[test]
    fn test_unknown_server_directories_are_dropped() {
        let mut config = CollectorConfig::default();
        config.servers.push(server("web"));
        config.directories = vec![directory("web"), directory("ghost")];

        let config = validate(config).unwrap();
        assert_eq!(config.directories.len(), 1);
        assert_eq!(config.directories[0].server, "web");
    }

    #[test]
    fn test_key_path_is_expanded() {
        let mut config = CollectorConfig::default();
        let mut s = server("web");
        s.key_file = Some("~/.ssh/id_ed25519".to_string());
        config.servers.push(s);

        let config = validate(config).unwrap();
        let key = config.servers[0].key_file.clone().unwrap();
        if let Some(home) = dirs::home_dir() {
            assert!(key.starts_with(&home.display().to_string()));
        }
        assert!(key.ends_with(".ssh/id_ed25519"));
    }

    #[test]
    fn test_expand_tilde_leaves_other_paths() {
        assert_eq!(expand_tilde("/etc/keys/id"), "/etc/keys/id");
        assert_eq!(expand_tilde("~user/id"), "~user/id");
    }
}
