//! `/ssh` namespace
//!
//! | in               | out               |
//! |------------------|-------------------|
//! | `connect_ssh`    | `ssh_connected`   |
//! | `terminal_input` | `terminal_output` |
//! | `resize`         | `ssh_error`       |
//! | `disconnect`     |                   |

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::channel::{decode_payload, ChannelError, InboundEvent, Namespace, Socket};
use crate::config::{looks_like_alias, HostDirectory};
use crate::session::{ManagedSession, SessionRegistry};
use crate::ssh::{
    AuthResolver, Credentials, HostConfig, ShellConnector, ShellStreams, DEFAULT_PORT,
};
use crate::terminal::TerminalSession;

pub const SSH_CONNECTED: &str = "ssh_connected";
pub const SSH_ERROR: &str = "ssh_error";

/// Initial PTY size; the browser sends a resize once its terminal is laid out
pub const INITIAL_ROWS: u32 = 24;
pub const INITIAL_COLS: u32 = 80;

/// `connect_ssh` payload. Absent and `null` fields read as empty.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default, deserialize_with = "nullable_string")]
    pub host: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub username: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub password: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub private_key: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub passphrase: String,
}

fn nullable_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Port>::deserialize(deserializer)? {
        Some(Port::Text(text)) => text.trim().to_string(),
        Some(Port::Number(number)) => number.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResizeRequest {
    pub cols: u32,
    pub rows: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshConnected {
    pub host: String,
    pub port: String,
    pub user: String,
}

pub enum SshEvent {
    Connect(Box<ConnectRequest>),
    Input(String),
    Resize(ResizeRequest),
}

impl InboundEvent for SshEvent {
    fn decode(name: &str, data: Value) -> Result<Self, ChannelError> {
        match name {
            "connect_ssh" => {
                if data.is_null() {
                    return Err(ChannelError::MalformedPayload(
                        "No connection data provided".to_string(),
                    ));
                }
                decode_payload(data, "Invalid connection data format")
                    .map(|req| SshEvent::Connect(Box::new(req)))
            }
            "terminal_input" => {
                decode_payload(data, "Invalid terminal input format").map(SshEvent::Input)
            }
            "resize" => decode_payload(data, "Invalid resize data format").map(SshEvent::Resize),
            other => Err(ChannelError::UnknownEvent(other.to_string())),
        }
    }
}

/// Handlers for the `/ssh` namespace
pub struct SshNamespace {
    registry: Arc<SessionRegistry<TerminalSession>>,
    connector: Arc<dyn ShellConnector>,
    resolver: AuthResolver,
    directory: HostDirectory,
}

impl SshNamespace {
    pub fn new(
        registry: Arc<SessionRegistry<TerminalSession>>,
        connector: Arc<dyn ShellConnector>,
        resolver: AuthResolver,
        directory: HostDirectory,
    ) -> Self {
        Self {
            registry,
            connector,
            resolver,
            directory,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<TerminalSession>> {
        &self.registry
    }

    /// Directory entry merged with the request, or a manual config
    async fn host_config(&self, host: &str, username: &str, port: &str) -> HostConfig {
        if looks_like_alias(host) {
            match self.directory.lookup(host).await {
                Ok(config) => {
                    debug!("Using host directory entry for {}", host);
                    return config.with_overrides(username, port);
                }
                Err(e) => debug!("No host directory entry for {}: {}", host, e),
            }
        }
        HostConfig::manual(host, username, port)
    }

    async fn connect(&self, socket: &Socket, request: ConnectRequest) {
        if request.host.is_empty() || request.username.is_empty() {
            socket.emit(SSH_ERROR, "Host and username are required");
            return;
        }

        // A connection id owns at most one bridge; a new connect replaces it
        if self.registry.cleanup(socket.id()).await {
            info!("Replacing existing SSH session for {}", socket.id());
        }

        let port = if request.port.is_empty() {
            DEFAULT_PORT.to_string()
        } else {
            request.port.clone()
        };
        let host = self.host_config(&request.host, &request.username, &port).await;

        let credentials = Credentials {
            password: Zeroizing::new(request.password),
            private_key: request.private_key,
            passphrase: Zeroizing::new(request.passphrase),
        };
        let auth = match self.resolver.resolve(credentials, &host).await {
            Ok(auth) => auth,
            Err(e) => {
                socket.emit(SSH_ERROR, &e.to_string());
                return;
            }
        };

        let client = match self.connector.connect(&host, auth).await {
            Ok(client) => client,
            Err(e) => {
                warn!("SSH connection to {} failed: {}", host, e);
                socket.emit(SSH_ERROR, &format!("SSH connection failed: {}", e));
                return;
            }
        };

        let ShellStreams {
            input,
            output,
            session,
        } = match self
            .connector
            .open_shell(&client, INITIAL_ROWS, INITIAL_COLS)
            .await
        {
            Ok(streams) => streams,
            Err(e) => {
                client.disconnect().await;
                socket.emit(SSH_ERROR, &format!("Failed to start shell: {}", e));
                return;
            }
        };

        let terminal = Arc::new(TerminalSession::bridged(
            socket.clone(),
            client,
            input,
            session,
        ));
        if let Some(previous) = self.registry.replace(socket.id(), terminal.clone()).await {
            previous.teardown().await;
        }

        info!("Terminal bridged for {} -> {}", socket.id(), host);
        socket.emit(
            SSH_CONNECTED,
            &SshConnected {
                host: request.host,
                port,
                user: request.username,
            },
        );
        terminal.start_pump(output, self.registry.clone());
    }

    async fn input(&self, socket: &Socket, data: String) {
        let Some(terminal) = self.registry.get(socket.id()).await else {
            socket.emit(SSH_ERROR, "No active SSH session");
            return;
        };
        if let Err(e) = terminal.write_input(&data).await {
            socket.emit(SSH_ERROR, &e.to_string());
        }
    }

    async fn resize(&self, socket: &Socket, request: ResizeRequest) {
        let Some(terminal) = self.registry.get(socket.id()).await else {
            socket.emit(SSH_ERROR, "No active SSH session");
            return;
        };
        if !terminal.resize(request.cols, request.rows).await {
            debug!("Ignored resize for inactive session {}", socket.id());
        }
    }
}

#[async_trait]
impl Namespace for SshNamespace {
    type Event = SshEvent;

    fn error_event(&self) -> &'static str {
        SSH_ERROR
    }

    async fn on_event(&self, socket: &Socket, event: SshEvent) {
        match event {
            SshEvent::Connect(request) => self.connect(socket, *request).await,
            SshEvent::Input(data) => self.input(socket, data).await,
            SshEvent::Resize(request) => self.resize(socket, request).await,
        }
    }

    async fn on_disconnect(&self, socket: &Socket) {
        self.registry.cleanup(socket.id()).await;
    }
}
