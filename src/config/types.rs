//! Panel configuration types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Cookie carrying the operator session token
pub const DEFAULT_COOKIE_NAME: &str = "mp-auth";

/// Operator session lifetime (24h)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Dashboard push interval for fresh sessions
pub const DEFAULT_REFRESH_SECS: u64 = 10;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Root configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Config format version
    pub version: u32,

    /// Listen address for the event channel server
    pub bind: String,

    /// OpenSSH-style config used as the host directory
    pub ssh_config_path: String,

    /// Name of the session cookie
    pub cookie_name: String,

    /// Operator session lifetime in seconds
    pub session_ttl_secs: u64,

    /// Initial dashboard refresh rate in seconds (0 = off)
    pub default_refresh_secs: u64,

    /// Operator accounts: username -> encoded password hash
    pub users: BTreeMap<String, String>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            bind: DEFAULT_BIND.to_string(),
            ssh_config_path: "~/.ssh/config".to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            default_refresh_secs: DEFAULT_REFRESH_SECS,
            users: BTreeMap::new(),
        }
    }
}

impl PanelConfig {
    /// Apply `MINIPANEL_BIND` if set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("MINIPANEL_BIND") {
            if !bind.trim().is_empty() {
                self.bind = bind.trim().to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PanelConfig = serde_json::from_str(r#"{"bind": "127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.cookie_name, "mp-auth");
        assert_eq!(config.session_ttl_secs, 86400);
        assert_eq!(config.default_refresh_secs, 10);
        assert!(config.users.is_empty());
    }
}
