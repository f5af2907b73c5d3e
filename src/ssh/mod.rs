//! SSH module - remote shell establishment
//!
//! This module provides the SSH side of the terminal bridge using russh.
//!
//! # Features
//! - Ordered authentication method resolution (password, keys, default keys)
//! - Single-owner client handle task
//! - PTY shell channels with resize and half-close

mod auth;
mod client;
mod config;
mod error;
mod handle_owner;
mod session;

pub use auth::{
    default_key_paths, load_private_key, AuthMethodSet, AuthProof, AuthResolver, Credentials,
    Identity,
};
pub use client::{ClientHandler, ShellConnector, SshConnector};
pub use config::{HostConfig, DEFAULT_PORT, MANUAL_CONNECT_TIMEOUT};
pub use error::SshError;
pub use handle_owner::{spawn_client_owner_task, ClientCommand, ClientController};
pub use session::{
    open_shell, ShellCommand, ShellInput, ShellOutput, ShellSession, ShellStreams, TERM,
};

