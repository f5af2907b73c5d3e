//! Event channel errors

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::http::StatusCode;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// Payload had the wrong shape; the message is shown to the client as is
    #[error("{0}")]
    MalformedPayload(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// HTTP response used to refuse a WebSocket upgrade
    pub fn rejection(&self) -> ErrorResponse {
        let (status, body) = match self {
            ChannelError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ChannelError::UnknownNamespace(_) => (StatusCode::NOT_FOUND, "Not Found"),
            _ => (StatusCode::BAD_REQUEST, "Bad Request"),
        };
        let mut response = ErrorResponse::new(Some(body.to_string()));
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_status() {
        assert_eq!(
            ChannelError::Unauthorized.rejection().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ChannelError::UnknownNamespace("/x".into()).rejection().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ChannelError::Unauthorized.rejection().body().as_deref(),
            Some("Unauthorized")
        );
    }
}
