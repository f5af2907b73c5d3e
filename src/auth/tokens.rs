//! Operator login sessions

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use tracing::debug;

const TOKEN_LEN: usize = 32;

/// One logged-in operator
#[derive(Debug, Clone)]
pub struct OperatorSession {
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OperatorSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Token -> operator session
pub struct TokenStore {
    sessions: RwLock<HashMap<String, OperatorSession>>,
    ttl: chrono::Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Issue a new token for `username`
    pub fn create(&self, username: &str) -> String {
        let mut bytes = [0u8; TOKEN_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let now = Utc::now();
        let session = OperatorSession {
            username: username.to_string(),
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.sessions.write().insert(token.clone(), session);
        debug!("Issued session token for {}", username);
        token
    }

    /// Username for a live token. Expired tokens are dropped.
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(token) {
                None => return None,
                Some(session) if !session.is_expired(now) => {
                    return Some(session.username.clone())
                }
                Some(_) => {}
            }
        }
        self.sessions.write().remove(token);
        None
    }

    pub fn delete(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Drop every expired session; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
