//! Operator authentication

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, COOKIE};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tracing::{info, warn};

use super::password::{hash_password, verify_password};
use super::tokens::TokenStore;
use super::AuthError;
use crate::config::PanelConfig;

/// Verifies operators and tracks their login sessions
pub struct AuthManager {
    users: RwLock<BTreeMap<String, String>>,
    tokens: TokenStore,
    cookie_name: String,
    session_ttl: Duration,
}

impl AuthManager {
    pub fn new(
        users: BTreeMap<String, String>,
        cookie_name: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            users: RwLock::new(users),
            tokens: TokenStore::new(ttl),
            cookie_name: cookie_name.into(),
            session_ttl: ttl,
        }
    }

    pub fn from_config(config: &PanelConfig) -> Self {
        Self::new(
            config.users.clone(),
            config.cookie_name.clone(),
            Duration::from_secs(config.session_ttl_secs),
        )
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Verify credentials and issue a session token
    pub fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let stored = self.users.read().get(username).cloned();
        let Some(stored) = stored else {
            warn!("Login attempt for unknown user {}", username);
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(password, &stored)? {
            warn!("Wrong password for {}", username);
            return Err(AuthError::InvalidCredentials);
        }

        info!("Operator {} logged in", username);
        Ok(self.tokens.create(username))
    }

    pub fn logout(&self, token: &str) {
        if self.tokens.delete(token) {
            info!("Operator session ended");
        }
    }

    /// Create or replace an operator account.
    ///
    /// Returns the encoded hash so the caller can persist it.
    pub fn add_user(&self, username: &str, password: &str) -> Result<String, AuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let hash = hash_password(password)?;
        self.users
            .write()
            .insert(username.to_string(), hash.clone());
        Ok(hash)
    }

    pub fn users(&self) -> BTreeMap<String, String> {
        self.users.read().clone()
    }

    /// Username for a `Cookie` header value carrying a live session cookie
    pub fn authenticate_cookie(&self, cookie_header: &str) -> Option<String> {
        let token = cookie_value(cookie_header, &self.cookie_name)?;
        self.tokens.validate(token)
    }

    /// Username for an `Authorization` header value (`Bearer <token>` or a bare token)
    pub fn authenticate_bearer(&self, authorization: &str) -> Option<String> {
        let token = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .trim();
        if token.is_empty() {
            return None;
        }
        self.tokens.validate(token)
    }

    /// Operator behind a request: the session cookie first, then `Authorization`
    pub fn authenticate_headers(&self, headers: &HeaderMap) -> Option<String> {
        let from_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|header| self.authenticate_cookie(header));

        from_cookie.or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|header| self.authenticate_bearer(header))
        })
    }

    /// Session token carried in the `Cookie` headers, live or not
    pub fn cookie_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|header| cookie_value(header, &self.cookie_name))
    }
}

/// Value of cookie `name` in a `Cookie` header
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuthManager {
        let manager = AuthManager::new(BTreeMap::new(), "mp-auth", Duration::from_secs(60));
        manager.add_user("admin", "s3cret").unwrap();
        manager
    }

    #[test]
    fn test_login_and_cookie_auth() {
        let manager = manager();
        let token = manager.login("admin", "s3cret").unwrap();

        let header = format!("theme=dark; mp-auth={}; other=1", token);
        assert_eq!(manager.authenticate_cookie(&header).as_deref(), Some("admin"));
        assert_eq!(
            manager.authenticate_bearer(&format!("Bearer {}", token)).as_deref(),
            Some("admin")
        );

        manager.logout(&token);
        assert_eq!(manager.authenticate_cookie(&header), None);
    }

    #[test]
    fn test_login_rejects_bad_credentials() {
        let manager = manager();
        assert!(matches!(
            manager.login("admin", "nope"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            manager.login("ghost", "s3cret"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_cookie_value() {
        assert_eq!(cookie_value("a=1; mp-auth=tok", "mp-auth"), Some("tok"));
        assert_eq!(cookie_value("mp-auth-old=x", "mp-auth"), None);
        assert_eq!(cookie_value("", "mp-auth"), None);
    }
}
