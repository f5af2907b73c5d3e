//! SSH Config Host Directory
//!
//! Looks up per-host connection defaults in an OpenSSH-style config file.
//! Supports:
//! - Basic: Host, HostName, User, Port, IdentityFile, ConnectTimeout
//! - Host patterns with `*`, `?` and `!` negation
//! - Options before the first Host block apply to every host
//!
//! As in OpenSSH, the first value obtained for an option wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, warn};

use crate::ssh::{HostConfig, DEFAULT_PORT};

/// Timeout used when the host entry has no ConnectTimeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSH config lookup errors
#[derive(Debug, thiserror::Error)]
pub enum SshConfigError {
    #[error("Failed to determine home directory")]
    NoHomeDir,

    #[error("Failed to read SSH config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Host {0} not found in SSH config")]
    NotFound(String),
}

/// One `Host` block (or the implicit global block)
#[derive(Debug, Clone, Default)]
pub struct HostBlock {
    /// Patterns after `Host`; empty for the global block
    pub patterns: Vec<String>,
    /// Options in file order, keys lowercased
    pub options: Vec<(String, String)>,
}

impl HostBlock {
    fn is_global(&self) -> bool {
        self.patterns.is_empty()
    }

    /// OpenSSH semantics: any positive pattern matches and no negated one does
    pub fn matches(&self, alias: &str) -> bool {
        if self.is_global() {
            return true;
        }
        let mut matched = false;
        for pattern in &self.patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if glob_match(negated, alias) {
                    return false;
                }
            } else if glob_match(pattern, alias) {
                matched = true;
            }
        }
        matched
    }
}

/// Options for one alias after merging every matching block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfigHost {
    pub alias: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<String>,
    pub identity_file: Option<String>,
    pub connect_timeout: Option<String>,
}

impl SshConfigHost {
    /// Fill in defaults and produce a connectable [`HostConfig`]
    pub fn into_host_config(self) -> HostConfig {
        let timeout = match self.connect_timeout.as_deref().map(str::parse::<u64>) {
            Some(Ok(secs)) => Duration::from_secs(secs),
            Some(Err(_)) => {
                warn!(
                    "Ignoring invalid ConnectTimeout for {}, using {}s",
                    self.alias,
                    DEFAULT_CONNECT_TIMEOUT.as_secs()
                );
                DEFAULT_CONNECT_TIMEOUT
            }
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let identity_file = self
            .identity_file
            .unwrap_or_else(|| "$HOME/.ssh/id_rsa".to_string());

        HostConfig {
            user: self.user.unwrap_or_else(whoami::username),
            hostname: self.hostname.unwrap_or_else(|| self.alias.clone()),
            port: self.port.unwrap_or_else(|| DEFAULT_PORT.to_string()),
            identity_file: Some(expand_path(&identity_file)),
            timeout,
            alias: self.alias,
        }
    }
}

/// Read-only view of an SSH config file
#[derive(Debug, Clone)]
pub struct HostDirectory {
    path: PathBuf,
}

impl HostDirectory {
    /// Directory backed by the given file; the path is env/tilde expanded
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = expand_path(&path.as_ref().to_string_lossy());
        Self {
            path: PathBuf::from(path),
        }
    }

    /// Directory backed by `~/.ssh/config`
    pub fn from_default() -> Result<Self, SshConfigError> {
        Ok(Self {
            path: default_ssh_config_path()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up `alias`, filling unspecified fields with defaults
    pub async fn lookup(&self, alias: &str) -> Result<HostConfig, SshConfigError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| SshConfigError::Io {
                path: self.path.clone(),
                source,
            })?;

        let blocks = parse_ssh_config_content(&content)?;
        let host = resolve_host(&blocks, alias)
            .ok_or_else(|| SshConfigError::NotFound(alias.to_string()))?;

        debug!("Resolved {} from {}", alias, self.path.display());
        Ok(host.into_host_config())
    }
}

/// Whether `host` should be looked up in the host directory rather than
/// dialed directly
pub fn looks_like_alias(host: &str) -> bool {
    !host.is_empty() && !host.contains('.') && host != "localhost"
}

/// Get default SSH config path
pub fn default_ssh_config_path() -> Result<PathBuf, SshConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("config"))
        .ok_or(SshConfigError::NoHomeDir)
}

/// Parse SSH config content into blocks
pub fn parse_ssh_config_content(content: &str) -> Result<Vec<HostBlock>, SshConfigError> {
    let mut blocks = vec![HostBlock::default()];
    // Options inside Match blocks are not evaluated
    let mut in_match = false;

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = split_directive(line).ok_or_else(|| SshConfigError::Parse {
            line: line_no,
            message: format!("missing value for '{}'", line),
        })?;

        let key = key.to_ascii_lowercase();
        match key.as_str() {
            "host" => {
                in_match = false;
                blocks.push(HostBlock {
                    patterns: value.split_whitespace().map(str::to_string).collect(),
                    options: Vec::new(),
                });
            }
            "match" => {
                in_match = true;
            }
            _ if in_match => {}
            _ => {
                if let Some(block) = blocks.last_mut() {
                    block.options.push((key, unquote(value).to_string()));
                }
            }
        }
    }

    Ok(blocks)
}

/// Merge every block matching `alias`; `None` if no Host block matches
pub fn resolve_host(blocks: &[HostBlock], alias: &str) -> Option<SshConfigHost> {
    let matching: Vec<&HostBlock> = blocks.iter().filter(|b| b.matches(alias)).collect();
    if !matching.iter().any(|b| !b.is_global()) {
        return None;
    }

    let mut host = SshConfigHost {
        alias: alias.to_string(),
        ..Default::default()
    };

    for (key, value) in matching.iter().flat_map(|b| b.options.iter()) {
        let slot = match key.as_str() {
            "hostname" => &mut host.hostname,
            "user" => &mut host.user,
            "port" => &mut host.port,
            "identityfile" => &mut host.identity_file,
            "connecttimeout" => &mut host.connect_timeout,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.clone());
        }
    }

    Some(host)
}

/// Split "Key Value" or "Key=Value"
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let key_end = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let key = &line[..key_end];
    let rest = line[key_end..].trim_start();
    let value = rest.strip_prefix('=').unwrap_or(rest).trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Case-insensitive glob match supporting `*` and `?`
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references.
///
/// Unset variables expand to the empty string.
pub fn expand_path(input: &str) -> String {
    let home = || {
        std::env::var("HOME").ok().or_else(|| {
            dirs::home_dir().map(|h| h.to_string_lossy().into_owned())
        })
    };

    let tilde_expanded = if input == "~" {
        home().unwrap_or_else(|| input.to_string())
    } else if let Some(rest) = input.strip_prefix("~/") {
        match home() {
            Some(h) => format!("{}/{}", h.trim_end_matches('/'), rest),
            None => input.to_string(),
        }
    } else {
        input.to_string()
    };

    let mut out = String::with_capacity(tilde_expanded.len());
    let mut chars = tilde_expanded.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                out.push_str("${");
                out.push_str(&name);
                continue;
            }
            name
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            name
        };

        let value = if name == "HOME" {
            home()
        } else {
            std::env::var(&name).ok()
        };
        out.push_str(&value.unwrap_or_default());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
# Global defaults
ConnectTimeout 15

Host claw1
    HostName 10.0.0.5
    User deploy
    Port 2222
    IdentityFile ~/.ssh/claw_ed25519

Host web-* !web-legacy
    User www
    HostName = web.internal

Host *
    User fallback
    Port 2200
"#;

    fn directory(content: &str) -> (TempDir, HostDirectory) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, content).unwrap();
        let directory = HostDirectory::new(&path);
        (dir, directory)
    }

    #[tokio::test]
    async fn test_lookup_explicit_host() {
        let (_dir, directory) = directory(SAMPLE);
        let host = directory.lookup("claw1").await.unwrap();

        assert_eq!(host.alias, "claw1");
        assert_eq!(host.hostname, "10.0.0.5");
        assert_eq!(host.user, "deploy");
        assert_eq!(host.port, "2222");
        assert_eq!(host.timeout, Duration::from_secs(15));
        let identity = host.identity_file.unwrap();
        assert!(identity.ends_with("/.ssh/claw_ed25519"));
        assert!(!identity.starts_with('~'));
    }

    #[tokio::test]
    async fn test_wildcard_first_value_wins() {
        let (_dir, directory) = directory(SAMPLE);
        let host = directory.lookup("web-01").await.unwrap();
        assert_eq!(host.user, "www");
        assert_eq!(host.hostname, "web.internal");
        assert_eq!(host.port, "2200");
    }

    #[tokio::test]
    async fn test_negated_pattern_excludes_block() {
        let (_dir, directory) = directory(SAMPLE);
        let host = directory.lookup("web-legacy").await.unwrap();
        assert_eq!(host.user, "fallback");
        assert_eq!(host.hostname, "web-legacy");
    }

    #[tokio::test]
    async fn test_defaults_for_sparse_entry() {
        let (_dir, directory) = directory("Host bare\n    HostName bare.example\n");
        let host = directory.lookup("bare").await.unwrap();

        assert_eq!(host.user, whoami::username());
        assert_eq!(host.port, "22");
        assert_eq!(host.timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(host.identity_file.unwrap().ends_with("/.ssh/id_rsa"));
    }

    #[tokio::test]
    async fn test_unknown_alias_is_error() {
        let (_dir, directory) = directory("Host known\n    User a\n");
        let err = directory.lookup("stranger").await.unwrap_err();
        assert!(matches!(err, SshConfigError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let directory = HostDirectory::new(dir.path().join("nope"));
        let err = directory.lookup("claw1").await.unwrap_err();
        assert!(matches!(err, SshConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_line_is_error() {
        let err = parse_ssh_config_content("Host a\n  User\n").unwrap_err();
        assert!(matches!(err, SshConfigError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_match_blocks_are_skipped() {
        let blocks =
            parse_ssh_config_content("Match exec true\n  User nobody\nHost a\n  User alice\n")
                .unwrap();
        let host = resolve_host(&blocks, "a").unwrap();
        assert_eq!(host.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("web-?", "web-1"));
        assert!(!glob_match("web-?", "web-10"));
        assert!(glob_match("*.example.com", "a.b.example.com"));
        assert!(glob_match("CLAW*", "claw1"));
        assert!(!glob_match("db*", "web"));
    }

    #[test]
    fn test_expand_path_env() {
        std::env::set_var("MINIPANEL_TEST_KEYDIR", "/keys");
        assert_eq!(expand_path("$MINIPANEL_TEST_KEYDIR/id"), "/keys/id");
        assert_eq!(expand_path("${MINIPANEL_TEST_KEYDIR}/id"), "/keys/id");
        assert_eq!(expand_path("/plain/$"), "/plain/$");
        assert_eq!(expand_path("$MINIPANEL_TEST_UNSET_VAR/x"), "/x");
    }

    #[test]
    fn test_looks_like_alias() {
        assert!(looks_like_alias("claw1"));
        assert!(!looks_like_alias("example.com"));
        assert!(!looks_like_alias("localhost"));
        assert!(!looks_like_alias("10.0.0.1"));
        assert!(!looks_like_alias(""));
    }
}
