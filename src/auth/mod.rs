//! Operator authentication: accounts, login sessions, the login routes and
//! the connection gate

mod manager;
mod middleware;
mod password;
mod routes;
mod tokens;

pub use manager::{cookie_value, AuthManager};
pub use middleware::CookieAuth;
pub use password::{hash_password, verify_password};
pub use routes::{AuthRoutes, CHECK_AUTH_PATH, LOGIN_PATH, LOGOUT_PATH};
pub use tokens::{OperatorSession, TokenStore};

use crate::config::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Stored password hash is malformed")]
    MalformedHash,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
