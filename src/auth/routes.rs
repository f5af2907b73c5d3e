//! Login, logout and session check over plain HTTP

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::header::SET_COOKIE;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Method, StatusCode};
use tracing::warn;

use super::{AuthError, AuthManager};
use crate::channel::{json_response, HttpRequest, HttpResponse, HttpRoutes};

pub const LOGIN_PATH: &str = "/login";
pub const LOGOUT_PATH: &str = "/logout";
pub const CHECK_AUTH_PATH: &str = "/check-auth";

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct AuthReply<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

#[derive(Serialize)]
struct ErrorReply<'a> {
    success: bool,
    message: &'a str,
    error: String,
}

fn reply(
    status: StatusCode,
    message: &str,
    username: Option<&str>,
    token: Option<&str>,
) -> HttpResponse {
    json_response(
        status,
        &AuthReply {
            success: status.is_success(),
            message,
            username,
            token,
        },
    )
}

fn error(status: StatusCode, message: &str, error: String) -> HttpResponse {
    json_response(
        status,
        &ErrorReply {
            success: false,
            message,
            error,
        },
    )
}

/// `/login`, `/logout` and `/check-auth`
pub struct AuthRoutes {
    manager: Arc<AuthManager>,
}

impl AuthRoutes {
    pub fn new(manager: Arc<AuthManager>) -> Self {
        Self { manager }
    }

    fn with_cookie(&self, mut response: HttpResponse, token: &str, max_age: u64) -> HttpResponse {
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.manager.cookie_name(),
            token,
            max_age
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().insert(SET_COOKIE, value);
            }
            Err(e) => warn!("Session cookie not representable: {}", e),
        }
        response
    }

    fn login(&self, request: &HttpRequest) -> HttpResponse {
        if *request.method() != Method::POST {
            return error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", String::new());
        }
        let Ok(login) = serde_json::from_slice::<LoginRequest>(request.body()) else {
            return error(StatusCode::BAD_REQUEST, "Invalid request format", String::new());
        };

        match self.manager.login(&login.username, &login.password) {
            Ok(token) => {
                let response = reply(
                    StatusCode::OK,
                    "Login successful",
                    Some(&login.username),
                    Some(&token),
                );
                self.with_cookie(response, &token, self.manager.session_ttl().as_secs())
            }
            Err(AuthError::InvalidCredentials) => reply(
                StatusCode::UNAUTHORIZED,
                "Invalid username or password",
                None,
                None,
            ),
            Err(e) => error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create session",
                e.to_string(),
            ),
        }
    }

    fn logout(&self, request: &HttpRequest) -> HttpResponse {
        if *request.method() != Method::POST {
            return error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", String::new());
        }
        if let Some(token) = self.manager.cookie_token(request.headers()) {
            self.manager.logout(token);
        }
        let response = reply(StatusCode::OK, "Logout successful", None, None);
        self.with_cookie(response, "", 0)
    }

    fn check_auth(&self, request: &HttpRequest) -> HttpResponse {
        if *request.method() != Method::GET {
            return error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", String::new());
        }
        match self.manager.authenticate_headers(request.headers()) {
            Some(username) => reply(StatusCode::OK, "Authenticated", Some(&username), None),
            None => reply(StatusCode::UNAUTHORIZED, "Not authenticated", None, None),
        }
    }
}

impl HttpRoutes for AuthRoutes {
    fn handles(&self, path: &str) -> bool {
        matches!(path, LOGIN_PATH | LOGOUT_PATH | CHECK_AUTH_PATH)
    }

    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        match request.uri().path() {
            LOGIN_PATH => self.login(request),
            LOGOUT_PATH => self.logout(request),
            CHECK_AUTH_PATH => self.check_auth(request),
            _ => error(StatusCode::NOT_FOUND, "Not found", String::new()),
        }
    }
}
