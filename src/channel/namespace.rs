//! Namespace handlers
//!
//! A namespace owns one request path. Its inbound events are decoded once
//! into [`Namespace::Event`] before any handler code runs.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::ChannelError;
use super::protocol::unwrap_payload;
use super::socket::Socket;

/// Typed set of events a namespace accepts
pub trait InboundEvent: Sized + Send + 'static {
    /// Convert a wire event. Unrecognised names return
    /// [`ChannelError::UnknownEvent`].
    fn decode(name: &str, data: Value) -> Result<Self, ChannelError>;
}

#[async_trait]
pub trait Namespace: Send + Sync + 'static {
    type Event: InboundEvent;

    /// Event used to report payload errors to the client
    fn error_event(&self) -> &'static str;

    async fn on_connect(&self, _socket: &Socket) {}

    async fn on_event(&self, socket: &Socket, event: Self::Event);

    /// Called exactly once per connection, whichever way it ends
    async fn on_disconnect(&self, socket: &Socket);
}

/// Object-safe view of a [`Namespace`] used by the server
#[async_trait]
pub(crate) trait Dispatch: Send + Sync {
    async fn connected(&self, socket: &Socket);
    async fn dispatch(&self, socket: &Socket, name: &str, data: Value);
    async fn disconnected(&self, socket: &Socket);
    fn reject(&self, socket: &Socket, error: &ChannelError);
}

#[async_trait]
impl<N: Namespace> Dispatch for N {
    async fn connected(&self, socket: &Socket) {
        self.on_connect(socket).await;
    }

    async fn dispatch(&self, socket: &Socket, name: &str, data: Value) {
        match N::Event::decode(name, unwrap_payload(data)) {
            Ok(event) => self.on_event(socket, event).await,
            Err(ChannelError::UnknownEvent(name)) => {
                debug!("Ignoring unknown event {} from {}", name, socket.id());
            }
            Err(e) => self.reject(socket, &e),
        }
    }

    async fn disconnected(&self, socket: &Socket) {
        self.on_disconnect(socket).await;
    }

    fn reject(&self, socket: &Socket, error: &ChannelError) {
        warn!("Rejected event from {}: {}", socket.id(), error);
        socket.emit(self.error_event(), &error.to_string());
    }
}
