//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{HashAlg, PublicKey};
use tracing::{debug, info, warn};

use super::auth::{AuthMethodSet, AuthProof};
use super::config::HostConfig;
use super::error::SshError;
use super::handle_owner::{spawn_client_owner_task, ClientController};
use super::session::{open_shell, ShellStreams};

/// Dials remote hosts and starts interactive shells
///
/// Handlers depend on this trait rather than on russh directly so they can be
/// driven by a scripted connector in tests.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Dial, handshake and authenticate.
    async fn connect(
        &self,
        host: &HostConfig,
        auth: AuthMethodSet,
    ) -> Result<ClientController, SshError>;

    /// Open a session channel with a PTY and start a shell on it.
    async fn open_shell(
        &self,
        client: &ClientController,
        rows: u32,
        cols: u32,
    ) -> Result<ShellStreams, SshError>;
}

/// [`ShellConnector`] backed by russh
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(
        &self,
        host: &HostConfig,
        auth: AuthMethodSet,
    ) -> Result<ClientController, SshError> {
        let port = host
            .port_number()
            .ok_or_else(|| SshError::ConnectionFailed(format!("invalid port: {}", host.port)))?;

        info!("Connecting to SSH server at {}:{}", host.hostname, port);

        let handle = tokio::time::timeout(host.timeout, dial_and_authenticate(host, port, &auth))
            .await
            .map_err(|_| {
                SshError::Timeout(format!(
                    "connection to {}:{} timed out after {}s",
                    host.hostname,
                    port,
                    host.timeout.as_secs()
                ))
            })??;

        info!("SSH authentication successful for {}", host);

        Ok(spawn_client_owner_task(
            handle,
            format!("{}@{}:{}", host.user, host.hostname, port),
        ))
    }

    async fn open_shell(
        &self,
        client: &ClientController,
        rows: u32,
        cols: u32,
    ) -> Result<ShellStreams, SshError> {
        open_shell(client, rows, cols).await
    }
}

async fn dial_and_authenticate(
    host: &HostConfig,
    port: u16,
    auth: &AuthMethodSet,
) -> Result<client::Handle<ClientHandler>, SshError> {
    let ssh_config = client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    };

    let handler = ClientHandler::new(host.hostname.clone(), port);

    let mut handle = client::connect(
        Arc::new(ssh_config),
        (host.hostname.as_str(), port),
        handler,
    )
    .await
    .map_err(|e| match e {
        SshError::ProtocolError(msg) => SshError::ConnectionFailed(msg),
        other => other,
    })?;

    debug!("SSH handshake completed");

    let mut last_error = None;
    for proof in auth.iter() {
        let result = match proof {
            AuthProof::Password(password) => {
                handle
                    .authenticate_password(&host.user, password.as_str())
                    .await
            }
            AuthProof::PublicKey { key, .. } => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                handle
                    .authenticate_publickey(
                        &host.user,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await
            }
        };

        match result {
            Ok(outcome) if outcome.success() => {
                debug!("Authenticated with {} as {}", proof.kind(), host.user);
                return Ok(handle);
            }
            Ok(_) => {
                debug!("Server rejected {} for {}", proof.kind(), host.user);
            }
            Err(e) => {
                warn!("{} authentication error: {}", proof.kind(), e);
                last_error = Some(e.to_string());
            }
        }
    }

    let _ = handle
        .disconnect(russh::Disconnect::ByApplication, "Authentication failed", "en")
        .await;

    Err(SshError::AuthenticationFailed(last_error.unwrap_or_else(|| {
        format!("all {} authentication method(s) rejected", auth.len())
    })))
}

/// Client handler for russh callbacks
///
/// Accepts every host key. The key fingerprint is logged so operators can
/// audit what they connected to.
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
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        warn!(
            "Accepting unverified host key for {}:{} ({} {})",
            self.host,
            self.port,
            server_public_key.algorithm(),
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
