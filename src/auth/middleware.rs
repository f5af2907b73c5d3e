//! Session gate for event channel connections

use std::sync::Arc;

use tokio_tungstenite::tungstenite::handshake::server::Request;
use tracing::debug;

use super::AuthManager;
use crate::channel::{ChannelError, Middleware};

/// Accepts an upgrade only when it carries a live operator session
pub struct CookieAuth {
    manager: Arc<AuthManager>,
}

impl CookieAuth {
    pub fn new(manager: Arc<AuthManager>) -> Self {
        Self { manager }
    }
}

impl Middleware for CookieAuth {
    fn check(&self, request: &Request) -> Result<Option<String>, ChannelError> {
        match self.manager.authenticate_headers(request.headers()) {
            Some(username) => {
                debug!("Connection authorised for {}", username);
                Ok(Some(username))
            }
            None => Err(ChannelError::Unauthorized),
        }
    }
}
