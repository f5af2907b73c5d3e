//! SSH Authentication Method Resolution
//!
//! Turns the credentials supplied with a connect request into an ordered set
//! of proofs to offer the server:
//! 1. explicit password
//! 2. explicit private key
//! 3. the host directory's identity file (only when no explicit key)
//! 4. the first parseable default key (only when nothing else was usable
//!    and no password was given)
//!
//! Key load failures are logged and skipped; only an empty result is an error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::PrivateKey;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::config::HostConfig;
use super::error::SshError;
use crate::config::expand_path;

/// One candidate private-key credential
pub struct Identity {
    pub key_path: String,
    pub passphrase: Zeroizing<String>,
}

impl Identity {
    pub fn new(key_path: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }

    /// Load and parse the key, decrypting it when a passphrase is set
    pub fn load(&self) -> Result<PrivateKey, SshError> {
        let path = PathBuf::from(expand_path(&self.key_path));
        load_private_key(&path, &self.passphrase)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("key_path", &self.key_path)
            .field("passphrase", &if self.passphrase.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// A single usable credential proof
#[derive(Clone)]
pub enum AuthProof {
    Password(Zeroizing<String>),
    PublicKey { path: PathBuf, key: Arc<PrivateKey> },
}

impl AuthProof {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthProof::Password(_) => "password",
            AuthProof::PublicKey { .. } => "publickey",
        }
    }
}

impl fmt::Debug for AuthProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProof::Password(_) => f.write_str("Password(***)"),
            AuthProof::PublicKey { path, key } => f
                .debug_struct("PublicKey")
                .field("path", path)
                .field("algorithm", &key.algorithm().to_string())
                .finish(),
        }
    }
}

/// Ordered, non-empty sequence of proofs
#[derive(Debug, Clone)]
pub struct AuthMethodSet {
    proofs: Vec<AuthProof>,
}

impl AuthMethodSet {
    fn from_proofs(proofs: Vec<AuthProof>) -> Result<Self, SshError> {
        if proofs.is_empty() {
            return Err(SshError::NoAuthMethod);
        }
        Ok(Self { proofs })
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuthProof> {
        self.proofs.iter()
    }
}

/// Credentials as supplied by the operator; empty strings mean "not given"
#[derive(Default)]
pub struct Credentials {
    pub password: Zeroizing<String>,
    pub private_key: String,
    pub passphrase: Zeroizing<String>,
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            ..Default::default()
        }
    }
}

/// Builds [`AuthMethodSet`]s
#[derive(Debug, Clone)]
pub struct AuthResolver {
    default_keys: Vec<PathBuf>,
}

impl Default for AuthResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthResolver {
    /// Resolver that falls back to the standard keys in `~/.ssh`
    pub fn new() -> Self {
        Self {
            default_keys: default_key_paths(),
        }
    }

    /// Resolver with an explicit fallback key list
    pub fn with_default_keys(default_keys: Vec<PathBuf>) -> Self {
        Self { default_keys }
    }

    pub fn default_keys(&self) -> &[PathBuf] {
        &self.default_keys
    }

    /// Resolve on the blocking pool; key files are read and decrypted here.
    pub async fn resolve(
        &self,
        credentials: Credentials,
        host: &HostConfig,
    ) -> Result<AuthMethodSet, SshError> {
        let resolver = self.clone();
        let identity_file = host.identity_file.clone();
        tokio::task::spawn_blocking(move || {
            resolver.resolve_blocking(&credentials, identity_file.as_deref())
        })
        .await
        .map_err(|e| SshError::KeyError(format!("Key loading task failed: {}", e)))?
    }

    pub fn resolve_blocking(
        &self,
        credentials: &Credentials,
        identity_file: Option<&str>,
    ) -> Result<AuthMethodSet, SshError> {
        let mut proofs = Vec::new();
        let has_password = !credentials.password.is_empty();

        if has_password {
            proofs.push(AuthProof::Password(credentials.password.clone()));
        }

        if !credentials.private_key.is_empty() {
            let identity = Identity::new(
                credentials.private_key.clone(),
                credentials.passphrase.as_str(),
            );
            push_key(&mut proofs, &identity);
        } else if let Some(identity_file) = identity_file.filter(|p| !p.is_empty()) {
            let identity = Identity::new(identity_file, credentials.passphrase.as_str());
            push_key(&mut proofs, &identity);
        }

        if proofs.is_empty() && !has_password {
            for path in &self.default_keys {
                let identity = Identity::new(
                    path.to_string_lossy().into_owned(),
                    credentials.passphrase.as_str(),
                );
                if push_key(&mut proofs, &identity) {
                    info!("Using default key {:?}", path);
                    break;
                }
            }
        }

        debug!(
            "Resolved {} auth method(s): {:?}",
            proofs.len(),
            proofs.iter().map(AuthProof::kind).collect::<Vec<_>>()
        );
        AuthMethodSet::from_proofs(proofs)
    }
}

/// Load one identity into `proofs`; returns whether it parsed
fn push_key(proofs: &mut Vec<AuthProof>, identity: &Identity) -> bool {
    match identity.load() {
        Ok(key) => {
            proofs.push(AuthProof::PublicKey {
                path: PathBuf::from(expand_path(&identity.key_path)),
                key: Arc::new(key),
            });
            true
        }
        Err(e) => {
            warn!("Failed to load key from {}: {}", identity.key_path, e);
            false
        }
    }
}

/// Read and decode a private key file
pub fn load_private_key(path: &Path, passphrase: &str) -> Result<PrivateKey, SshError> {
    if !path.exists() {
        return Err(SshError::KeyError(format!(
            "private key file does not exist: {}",
            path.display()
        )));
    }

    let key_data = std::fs::read_to_string(path).map_err(|e| {
        SshError::KeyError(format!(
            "failed to read private key from {}: {}",
            path.display(),
            e
        ))
    })?;

    let passphrase = (!passphrase.is_empty()).then_some(passphrase);
    russh::keys::decode_secret_key(&key_data, passphrase).map_err(|e| match passphrase {
        Some(_) => SshError::KeyError(format!(
            "failed to parse private key with passphrase: {}",
            e
        )),
        None => SshError::KeyError(format!(
            "failed to parse private key (key may be encrypted and require a passphrase): {}",
            e
        )),
    })
}

/// Default SSH key paths, in the order they are tried
pub fn default_key_paths() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let ssh_dir = home.join(".ssh");

    vec![
        ssh_dir.join("id_rsa"),
        ssh_dir.join("id_ed25519"),
        ssh_dir.join("id_ecdsa"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Unencrypted ed25519 test key
    const TEST_KEY: &str = include_str!("../../tests/fixtures/id_ed25519_test");
    /// Same kind of key, encrypted with passphrase `hunter2`
    const TEST_KEY_ENCRYPTED: &str =
        include_str!("../../tests/fixtures/id_ed25519_encrypted_test");

    fn write_key(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn host(identity_file: Option<String>) -> HostConfig {
        HostConfig {
            alias: "box".to_string(),
            user: "root".to_string(),
            hostname: "box".to_string(),
            port: "22".to_string(),
            identity_file,
            timeout: Duration::from_secs(10),
        }
    }

    fn no_defaults() -> AuthResolver {
        AuthResolver::with_default_keys(Vec::new())
    }

    #[test]
    fn test_password_only_yields_one_method() {
        let set = no_defaults()
            .resolve_blocking(&Credentials::password("x"), None)
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().kind(), "password");
    }

    #[test]
    fn test_unreadable_key_without_password_fails() {
        let creds = Credentials {
            private_key: "/nonexistent/id_rsa".to_string(),
            ..Default::default()
        };
        let err = no_defaults().resolve_blocking(&creds, None).unwrap_err();
        assert!(matches!(err, SshError::NoAuthMethod));
    }

    #[test]
    fn test_bad_key_is_skipped_when_password_present() {
        let dir = TempDir::new().unwrap();
        let bad = write_key(&dir, "garbage", "not a key");
        let creds = Credentials {
            password: Zeroizing::new("pw".to_string()),
            private_key: bad.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let set = no_defaults().resolve_blocking(&creds, None).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_password_then_explicit_key_order() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, "id_ed25519", TEST_KEY);
        let creds = Credentials {
            password: Zeroizing::new("pw".to_string()),
            private_key: key.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let set = no_defaults().resolve_blocking(&creds, None).unwrap();
        let kinds: Vec<_> = set.iter().map(AuthProof::kind).collect();
        assert_eq!(kinds, vec!["password", "publickey"]);
    }

    #[test]
    fn test_explicit_key_shadows_identity_file() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, "explicit", TEST_KEY);
        let other = write_key(&dir, "from_config", TEST_KEY);
        let creds = Credentials {
            private_key: key.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let set = no_defaults()
            .resolve_blocking(&creds, Some(&other.to_string_lossy()))
            .unwrap();
        assert_eq!(set.len(), 1);
        let proof = set.iter().next().unwrap();
        match proof {
            AuthProof::PublicKey { path, .. } => assert_eq!(path, &key),
            other => panic!("unexpected proof {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_identity_file_from_host_config() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, "id_ed25519", TEST_KEY);
        let set = no_defaults()
            .resolve(
                Credentials::default(),
                &host(Some(key.to_string_lossy().into_owned())),
            )
            .await
            .unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_encrypted_key_needs_passphrase() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, "enc", TEST_KEY_ENCRYPTED);

        let without = Credentials {
            private_key: key.to_string_lossy().into_owned(),
            ..Default::default()
        };
        assert!(no_defaults().resolve_blocking(&without, None).is_err());

        let with = Credentials {
            private_key: key.to_string_lossy().into_owned(),
            passphrase: Zeroizing::new("hunter2".to_string()),
            ..Default::default()
        };
        assert_eq!(no_defaults().resolve_blocking(&with, None).unwrap().len(), 1);
    }

    #[test]
    fn test_default_keys_stop_at_first_parseable() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("id_rsa");
        let first = write_key(&dir, "id_ed25519", TEST_KEY);
        let second = write_key(&dir, "id_ecdsa", TEST_KEY);
        let resolver = AuthResolver::with_default_keys(vec![missing, first.clone(), second]);

        let set = resolver
            .resolve_blocking(&Credentials::default(), None)
            .unwrap();
        assert_eq!(set.len(), 1);
        let proof = set.iter().next().unwrap();
        match proof {
            AuthProof::PublicKey { path, .. } => assert_eq!(path, &first),
            other => panic!("unexpected proof {:?}", other),
        }
    }

    #[test]
    fn test_default_keys_skipped_when_password_given() {
        let dir = TempDir::new().unwrap();
        let key = write_key(&dir, "id_rsa", TEST_KEY);
        let resolver = AuthResolver::with_default_keys(vec![key]);
        let set = resolver
            .resolve_blocking(&Credentials::password("pw"), None)
            .unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_default_key_order() {
        let paths = default_key_paths();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["id_rsa", "id_ed25519", "id_ecdsa"]);
    }

    #[test]
    fn test_identity_debug_hides_passphrase() {
        let identity = Identity::new("~/.ssh/id_rsa", "secret");
        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains("secret"));
    }
}
