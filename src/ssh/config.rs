//! SSH Host Configuration

use std::fmt;
use std::time::Duration;

/// Default SSH port, kept as a string the way browsers send it
pub const DEFAULT_PORT: &str = "22";

/// Timeout used when a host is not found in the host directory
pub const MANUAL_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters for one remote host
///
/// Built once per connect attempt, either from a host directory lookup merged
/// with caller overrides or constructed manually from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Host alias as requested by the caller
    pub alias: String,
    /// Remote username
    pub user: String,
    /// Address to dial
    pub hostname: String,
    /// SSH port
    pub port: String,
    /// Identity file from the host directory, if any
    pub identity_file: Option<String>,
    /// Applied to dial + handshake + authentication
    pub timeout: Duration,
}

impl HostConfig {
    /// Manual configuration for a host that is not in the host directory
    pub fn manual(
        host: impl Into<String>,
        user: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let port = port.into();
        Self {
            alias: host.clone(),
            user: user.into(),
            hostname: host,
            port: if port.is_empty() {
                DEFAULT_PORT.to_string()
            } else {
                port
            },
            identity_file: None,
            timeout: MANUAL_CONNECT_TIMEOUT,
        }
    }

    /// Apply caller overrides on top of directory defaults.
    ///
    /// The username wins when non-empty and different; the port wins when it
    /// is not the default port and differs from the directory value.
    pub fn with_overrides(mut self, username: &str, port: &str) -> Self {
        if !username.is_empty() && username != self.user {
            self.user = username.to_string();
        }
        if !port.is_empty() && port != DEFAULT_PORT && port != self.port {
            self.port = port.to_string();
        }
        self
    }

    /// Parsed port number
    pub fn port_number(&self) -> Option<u16> {
        self.port.parse().ok()
    }
}

impl fmt::Display for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{} (alias: {}, timeout: {}s)",
            self.user,
            self.hostname,
            self.port,
            self.alias,
            self.timeout.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_host() -> HostConfig {
        HostConfig {
            alias: "claw1".to_string(),
            user: "deploy".to_string(),
            hostname: "10.0.0.5".to_string(),
            port: "2222".to_string(),
            identity_file: Some("/home/op/.ssh/id_ed25519".to_string()),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_manual_defaults_port() {
        let host = HostConfig::manual("example.com", "root", "");
        assert_eq!(host.port, "22");
        assert_eq!(host.hostname, "example.com");
        assert_eq!(host.timeout, MANUAL_CONNECT_TIMEOUT);
        assert!(host.identity_file.is_none());
    }

    #[test]
    fn test_override_user_wins_when_different() {
        let host = directory_host().with_overrides("root", "22");
        assert_eq!(host.user, "root");
        // Default port never overrides the directory port
        assert_eq!(host.port, "2222");
    }

    #[test]
    fn test_override_port_when_not_default() {
        let host = directory_host().with_overrides("", "2200");
        assert_eq!(host.user, "deploy");
        assert_eq!(host.port, "2200");
    }
}
