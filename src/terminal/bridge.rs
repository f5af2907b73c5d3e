//! Terminal Bridge
//!
//! Binds one remote shell to one event channel connection.
//!
//! ```text
//! Connecting ──shell started──► Bridged ──EOF / disconnect / cleanup──► Closed
//!     │                                                                   ▲
//!     └──────────────────────────── any failure ──────────────────────────┘
//! ```
//!
//! `Connecting` lives in the `/ssh` handler; a `TerminalSession` is only
//! created once a shell is running, so it starts out `Bridged`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunker::Utf8Chunker;
use crate::channel::Socket;
use crate::session::{ManagedSession, SessionRegistry};
use crate::ssh::{ClientController, ShellInput, ShellOutput, ShellSession};

/// Event carrying shell output to the browser
pub const TERMINAL_OUTPUT: &str = "terminal_output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Bridged,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("No active SSH session")]
    NoActiveSession,

    #[error("Failed to send input")]
    InputFailed,
}

struct Handles {
    state: BridgeState,
    client: Option<ClientController>,
    input: Option<ShellInput>,
    session: Option<ShellSession>,
}

/// One live shell bridged to one connection
pub struct TerminalSession {
    connection_id: String,
    socket: Socket,
    handles: Mutex<Handles>,
    cancel: CancellationToken,
}

impl TerminalSession {
    /// Wrap a freshly started shell
    pub fn bridged(
        socket: Socket,
        client: ClientController,
        input: ShellInput,
        session: ShellSession,
    ) -> Self {
        Self {
            connection_id: socket.id().to_string(),
            socket,
            handles: Mutex::new(Handles {
                state: BridgeState::Bridged,
                client: Some(client),
                input: Some(input),
                session: Some(session),
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub async fn state(&self) -> BridgeState {
        self.handles.lock().await.state
    }

    /// Closed and every handle released
    pub async fn is_closed(&self) -> bool {
        let handles = self.handles.lock().await;
        handles.state == BridgeState::Closed
            && handles.client.is_none()
            && handles.input.is_none()
            && handles.session.is_none()
    }

    /// Write operator keystrokes to the shell
    pub async fn write_input(&self, data: &str) -> Result<(), BridgeError> {
        let handles = self.handles.lock().await;
        if handles.state != BridgeState::Bridged {
            return Err(BridgeError::NoActiveSession);
        }
        let input = handles.input.as_ref().ok_or(BridgeError::NoActiveSession)?;
        input.write(data.as_bytes().to_vec()).await.map_err(|e| {
            warn!("Input write for {} failed: {}", self.connection_id, e);
            BridgeError::InputFailed
        })
    }

    /// Change the PTY size. Returns `false` when the bridge is not live.
    pub async fn resize(&self, cols: u32, rows: u32) -> bool {
        let handles = self.handles.lock().await;
        if handles.state != BridgeState::Bridged {
            return false;
        }
        match handles.session.as_ref() {
            Some(session) => match session.window_change(cols, rows).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Resize for {} failed: {}", self.connection_id, e);
                    false
                }
            },
            None => false,
        }
    }

    /// Spawn the output pump.
    ///
    /// The pump emits output until the shell ends or the session is
    /// deactivated. When the shell ends on its own the pump retires the
    /// session from `registry`, unless it has been replaced meanwhile.
    pub fn start_pump(
        self: &Arc<Self>,
        output: ShellOutput,
        registry: Arc<SessionRegistry<TerminalSession>>,
    ) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.pump(output).await;

            if session.cancel.is_cancelled() {
                debug!("Pump for {} stopped by teardown", session.connection_id);
                return;
            }

            info!("Remote shell for {} ended", session.connection_id);
            if registry
                .remove_if_same(&session.connection_id, &session)
                .await
            {
                session.teardown().await;
            }
        });
    }

    async fn pump(&self, mut output: ShellOutput) {
        let mut chunker = Utf8Chunker::default();

        loop {
            let bytes = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                bytes = output.recv() => bytes,
            };

            let Some(bytes) = bytes else { break };
            for chunk in chunker.push(&bytes) {
                if !self.socket.emit(TERMINAL_OUTPUT, &chunk) {
                    debug!("Connection {} gone, stopping pump", self.connection_id);
                    return;
                }
            }
        }

        if let Some(tail) = chunker.finish() {
            self.socket.emit(TERMINAL_OUTPUT, &tail);
        }
    }
}

#[async_trait]
impl ManagedSession for TerminalSession {
    async fn deactivate(&self) {
        let mut handles = self.handles.lock().await;
        handles.state = BridgeState::Closed;
        self.cancel.cancel();
    }

    /// Close stdin, then the shell channel, then the client
    async fn teardown(&self) {
        let (input, session, client) = {
            let mut handles = self.handles.lock().await;
            handles.state = BridgeState::Closed;
            (
                handles.input.take(),
                handles.session.take(),
                handles.client.take(),
            )
        };
        self.cancel.cancel();

        if let Some(input) = input {
            if let Err(e) = input.close().await {
                debug!("Closing input for {}: {}", self.connection_id, e);
            }
        }
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                debug!("Closing shell for {}: {}", self.connection_id, e);
            }
        }
        if let Some(client) = client {
            client.disconnect().await;
            info!("Terminal session {} torn down", self.connection_id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::testing::drain;
    use crate::ssh::{ClientCommand, ShellCommand, ShellStreams};
    use tokio::sync::mpsc;

    /// Far ends of a scripted shell
    pub(crate) struct FakeRemote {
        pub client_rx: mpsc::Receiver<ClientCommand>,
        pub shell_rx: mpsc::Receiver<ShellCommand>,
        pub output_tx: mpsc::Sender<Vec<u8>>,
    }

    pub(crate) fn fake_shell() -> (ClientController, ShellStreams, FakeRemote) {
        let (client_tx, client_rx) = mpsc::channel(8);
        let (shell_tx, shell_rx) = mpsc::channel(64);
        let (output_tx, output_rx) = mpsc::channel(64);
        (
            ClientController::new(client_tx),
            ShellStreams::from_channels(shell_tx, output_rx),
            FakeRemote {
                client_rx,
                shell_rx,
                output_tx,
            },
        )
    }

    fn bridged(socket: Socket) -> (Arc<TerminalSession>, ShellOutput, FakeRemote) {
        let (client, streams, remote) = fake_shell();
        let session = Arc::new(TerminalSession::bridged(
            socket,
            client,
            streams.input,
            streams.session,
        ));
        (session, streams.output, remote)
    }

    #[tokio::test]
    async fn test_input_and_resize_reach_shell() {
        let (socket, _rx) = Socket::channel("c1");
        let (session, _output, mut remote) = bridged(socket);

        session.write_input("ls\n").await.unwrap();
        assert!(session.resize(100, 30).await);

        assert_eq!(
            remote.shell_rx.recv().await,
            Some(ShellCommand::Data(b"ls\n".to_vec()))
        );
        assert_eq!(
            remote.shell_rx.recv().await,
            Some(ShellCommand::Resize { cols: 100, rows: 30 })
        );
    }

    #[tokio::test]
    async fn test_teardown_order_and_idempotence() {
        let (socket, _rx) = Socket::channel("c1");
        let (session, _output, mut remote) = bridged(socket);

        session.teardown().await;
        session.teardown().await;

        assert_eq!(remote.shell_rx.recv().await, Some(ShellCommand::Eof));
        assert_eq!(remote.shell_rx.recv().await, Some(ShellCommand::Close));
        assert!(matches!(
            remote.client_rx.recv().await,
            Some(ClientCommand::Disconnect)
        ));
        assert!(remote.shell_rx.try_recv().is_err());
        assert!(session.is_closed().await);

        assert!(matches!(
            session.write_input("x").await,
            Err(BridgeError::NoActiveSession)
        ));
        assert!(!session.resize(80, 24).await);
    }

    #[tokio::test]
    async fn test_pump_emits_output_then_retires_on_eof() {
        let registry = Arc::new(SessionRegistry::new("terminal"));
        let (socket, mut rx) = Socket::channel("c1");
        let (session, output, mut remote) = bridged(socket);
        registry.replace("c1", session.clone()).await;

        session.start_pump(output, registry.clone());
        remote.output_tx.send(b"hello ".to_vec()).await.unwrap();
        remote.output_tx.send("w\u{00f6}rld".as_bytes().to_vec()).await.unwrap();
        drop(remote.output_tx);

        // Pump tears the session down, which disconnects the client
        assert!(matches!(
            remote.client_rx.recv().await,
            Some(ClientCommand::Disconnect)
        ));
        assert!(!registry.contains("c1").await);
        assert!(session.is_closed().await);

        let outputs: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.event == TERMINAL_OUTPUT)
            .filter_map(|e| e.data.as_str().map(str::to_string))
            .collect();
        assert_eq!(outputs.concat(), "hello w\u{00f6}rld");
    }

    #[tokio::test]
    async fn test_stale_pump_does_not_evict_replacement() {
        let registry = Arc::new(SessionRegistry::new("terminal"));
        let (socket, _rx) = Socket::channel("c1");
        let (old, old_output, old_remote) = bridged(socket.clone());
        let (new, _new_output, _new_remote) = bridged(socket);

        registry.replace("c1", old.clone()).await;
        old.start_pump(old_output, registry.clone());
        registry.replace("c1", new.clone()).await;
        drop(old_remote.output_tx);

        tokio::task::yield_now().await;
        let current = registry.get("c1").await.unwrap();
        assert!(Arc::ptr_eq(&current, &new));
        assert_eq!(new.state().await, BridgeState::Bridged);
    }
}
