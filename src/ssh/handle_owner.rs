//! Client Owner Task
//!
//! Only one task owns the `Handle<ClientHandler>`. Everything else talks to it
//! through a cloneable [`ClientController`] that sends commands over an mpsc
//! channel, so the handle is never shared behind a lock or touched
//! concurrently.

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Commands sent to the client owner task
pub enum ClientCommand {
    /// Open a session channel (for PTY/shell)
    OpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Handle to an authenticated SSH client
///
/// Cloning is cheap (copies the sender). Dropping every clone also ends the
/// owner task, which disconnects the client.
#[derive(Clone)]
pub struct ClientController {
    cmd_tx: mpsc::Sender<ClientCommand>,
}

impl ClientController {
    /// Wrap an existing command sender.
    ///
    /// Production code goes through [`spawn_client_owner_task`]; this exists so
    /// tests can observe the commands a controller sends.
    pub fn new(cmd_tx: mpsc::Sender<ClientCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Open a session channel
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::OpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx
            .await
            .map_err(|_| SshError::Disconnected)?
            .map_err(|e| SshError::ChannelError(e.to_string()))
    }

    /// Ask the owner task to disconnect. No-op once the task is gone.
    pub async fn disconnect(&self) {
        if self.cmd_tx.send(ClientCommand::Disconnect).await.is_err() {
            debug!("Client owner task already stopped");
        }
    }

    /// Check if the owner task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the client owner task, consuming the handle.
pub fn spawn_client_owner_task(handle: Handle<ClientHandler>, label: String) -> ClientController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(16);

    tokio::spawn(async move {
        let handle = handle;

        info!("Client owner task started for {}", label);

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                ClientCommand::OpenSession { reply_tx } => {
                    let result = handle.channel_open_session().await;
                    if reply_tx.send(result).is_err() {
                        // Channel is dropped here and the server closes it
                        warn!("Caller dropped before receiving channel_open_session result");
                    }
                }
                ClientCommand::Disconnect => {
                    info!("Disconnect requested for {}", label);
                    break;
                }
            }
        }

        drain_pending_commands(&mut cmd_rx);

        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            debug!("Disconnect for {} returned: {}", label, e);
        }
        info!("Client owner task terminated for {}", label);
    });

    ClientController { cmd_tx }
}

/// Answer every queued command with a disconnect
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<ClientCommand>) {
    cmd_rx.close();

    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            ClientCommand::OpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            ClientCommand::Disconnect => {}
        }
    }
}
