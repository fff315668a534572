//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use russh::*;
use tracing::{debug, info};

use super::config::{AuthMethod, HostDescriptor};
use super::error::SshError;

/// Authenticated SSH connection handle
pub type SshHandle = client::Handle<ClientHandler>;

/// Opens authenticated SSH connections for one host
pub struct SshClient {
    host: HostDescriptor,
}

impl SshClient {
    pub fn new(host: HostDescriptor) -> Self {
        Self { host }
    }

    /// Connect and authenticate, bounded by the host's timeout.
    ///
    /// The timeout covers TCP connect, key exchange and authentication.
    pub async fn connect(self) -> Result<SshHandle, SshError> {
        let timeout = self.host.timeout();
        match tokio::time::timeout(timeout, self.connect_inner()).await {
            Ok(result) => result,
            Err(_) => Err(SshError::Timeout(format!(
                "No response from {} within {:?}",
                self.host.address(),
                timeout
            ))),
        }
    }

    async fn connect_inner(&self) -> Result<SshHandle, SshError> {
        info!(
            "Connecting to SSH server {} at {}",
            self.host.name,
            self.host.address()
        );

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(self.host.host.clone(), self.host.port);

        let mut handle = client::connect(
            Arc::new(ssh_config),
            (self.host.host.as_str(), self.host.port),
            handler,
        )
        .await?;

        debug!("SSH handshake completed with {}", self.host.name);

        let authenticated = match &self.host.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.host.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(format!("{}: {}", key_path, e)))?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.host.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(format!(
                "{} rejected {} authentication for user {}",
                self.host.name,
                self.host.auth.kind(),
                self.host.username
            )));
        }

        info!("SSH authentication successful for {}", self.host.name);
        Ok(handle)
    }
}

/// Client handler for russh callbacks
///
/// Server keys are accepted on first sight; the collector talks to hosts the
/// operator listed explicitly in its configuration.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting host key for {}:{}", self.host, self.port);
        Ok(true)
    }
}
