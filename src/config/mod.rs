//! Configuration Management Module
//!
//! Handles the persistent panel configuration and read-only lookups in the
//! operator's OpenSSH config.

pub mod ssh_config;
pub mod storage;
pub mod types;

pub use ssh_config::{
    default_ssh_config_path, expand_path, looks_like_alias, HostDirectory, SshConfigError,
    SshConfigHost,
};
pub use storage::{config_dir, config_file, ConfigStorage, StorageError};
pub use types::{PanelConfig, CONFIG_VERSION, DEFAULT_COOKIE_NAME, DEFAULT_REFRESH_SECS};
