//! Interactive shell channels
//!
//! `open_shell` moves the russh channel into its own owner task. Callers get
//! three parts back: an input side for stdin, an output receiver for
//! stdout/stderr, and a session side for resize and close. When the owner task
//! ends it drops the output sender, so readers observe end of stream.

use russh::{ChannelMsg, Pty};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::error::SshError;
use super::handle_owner::ClientController;

/// Terminal type requested for every PTY
pub const TERM: &str = "xterm-256color";

const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::ECHOCTL, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Commands that can be sent to a shell channel
#[derive(Debug, PartialEq, Eq)]
pub enum ShellCommand {
    /// Data to send to the shell's stdin
    Data(Vec<u8>),
    /// Resize the PTY
    Resize { cols: u32, rows: u32 },
    /// Half-close stdin
    Eof,
    /// Close the channel
    Close,
}

/// Write side of the shell's stdin
#[derive(Debug, Clone)]
pub struct ShellInput {
    cmd_tx: mpsc::Sender<ShellCommand>,
}

impl ShellInput {
    pub async fn write(&self, data: Vec<u8>) -> Result<(), SshError> {
        self.cmd_tx
            .send(ShellCommand::Data(data))
            .await
            .map_err(|_| SshError::Disconnected)
    }

    /// Send EOF on stdin
    pub async fn close(&self) -> Result<(), SshError> {
        self.cmd_tx
            .send(ShellCommand::Eof)
            .await
            .map_err(|_| SshError::Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Control side of the shell channel
#[derive(Debug, Clone)]
pub struct ShellSession {
    cmd_tx: mpsc::Sender<ShellCommand>,
}

impl ShellSession {
    pub async fn window_change(&self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.cmd_tx
            .send(ShellCommand::Resize { cols, rows })
            .await
            .map_err(|_| SshError::Disconnected)
    }

    pub async fn close(&self) -> Result<(), SshError> {
        self.cmd_tx
            .send(ShellCommand::Close)
            .await
            .map_err(|_| SshError::Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Receiver of raw shell output; `None` means the channel has ended
pub type ShellOutput = mpsc::Receiver<Vec<u8>>;

/// Everything needed to drive one interactive shell
pub struct ShellStreams {
    pub input: ShellInput,
    pub output: ShellOutput,
    pub session: ShellSession,
}

impl ShellStreams {
    /// Assemble streams around an arbitrary command sink.
    ///
    /// `open_shell` uses this with its channel owner task; tests use it with a
    /// plain receiver.
    pub fn from_channels(cmd_tx: mpsc::Sender<ShellCommand>, output: ShellOutput) -> Self {
        Self {
            input: ShellInput {
                cmd_tx: cmd_tx.clone(),
            },
            output,
            session: ShellSession { cmd_tx },
        }
    }
}

/// Open a session channel, request a PTY and start a shell
pub async fn open_shell(
    client: &ClientController,
    rows: u32,
    cols: u32,
) -> Result<ShellStreams, SshError> {
    let channel = client.open_session_channel().await?;

    debug!("Channel opened, requesting PTY {}x{}", cols, rows);

    if let Err(e) = channel
        .request_pty(false, TERM, cols, rows, 0, 0, PTY_MODES)
        .await
    {
        let _ = channel.close().await;
        return Err(SshError::ChannelError(format!("PTY request failed: {}", e)));
    }

    if let Err(e) = channel.request_shell(false).await {
        let _ = channel.close().await;
        return Err(SshError::ChannelError(format!("Shell request failed: {}", e)));
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ShellCommand>(256);
    let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(256);

    tokio::spawn(async move {
        let mut channel = channel;
        let id = channel.id();
        debug!("Shell channel task started for {:?}", id);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ShellCommand::Data(data)) => {
                        if let Err(e) = channel.data(&data[..]).await {
                            error!("Failed to send data to SSH channel: {}", e);
                            break;
                        }
                    }
                    Some(ShellCommand::Resize { cols, rows }) => {
                        if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                            error!("Failed to resize PTY: {}", e);
                        } else {
                            debug!("PTY resized to {}x{}", cols, rows);
                        }
                    }
                    Some(ShellCommand::Eof) => {
                        if let Err(e) = channel.eof().await {
                            debug!("Failed to send EOF: {}", e);
                        }
                    }
                    Some(ShellCommand::Close) | None => {
                        let _ = channel.close().await;
                        break;
                    }
                },

                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if output_tx.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        if output_tx.send(data.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        info!("SSH channel {:?} closed by remote", id);
                        break;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!("Shell exited with status {}", exit_status);
                    }
                    Some(_) => {}
                },
            }
        }

        debug!("Shell channel task terminated for {:?}", id);
    });

    info!("Interactive shell started ({}x{})", cols, rows);

    Ok(ShellStreams::from_channels(cmd_tx, output_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streams_route_commands() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let (_out_tx, out_rx) = mpsc::channel(8);
        let streams = ShellStreams::from_channels(cmd_tx, out_rx);

        streams.input.write(b"ls\n".to_vec()).await.unwrap();
        streams.session.window_change(120, 40).await.unwrap();
        streams.input.close().await.unwrap();
        streams.session.close().await.unwrap();

        assert_eq!(cmd_rx.recv().await, Some(ShellCommand::Data(b"ls\n".to_vec())));
        assert_eq!(
            cmd_rx.recv().await,
            Some(ShellCommand::Resize { cols: 120, rows: 40 })
        );
        assert_eq!(cmd_rx.recv().await, Some(ShellCommand::Eof));
        assert_eq!(cmd_rx.recv().await, Some(ShellCommand::Close));
    }

    #[tokio::test]
    async fn test_write_after_channel_gone() {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (_out_tx, out_rx) = mpsc::channel(8);
        let streams = ShellStreams::from_channels(cmd_tx, out_rx);
        drop(cmd_rx);

        assert!(streams.input.is_closed());
        assert!(matches!(
            streams.input.write(b"x".to_vec()).await,
            Err(SshError::Disconnected)
        ));
    }
}
