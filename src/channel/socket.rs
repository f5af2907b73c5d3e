//! Per-connection emit handle

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::protocol::OutboundEvent;

/// Messages consumed by a connection's writer task
#[derive(Debug)]
pub enum Outbound {
    Event(OutboundEvent),
    Close,
}

/// Cloneable handle for pushing events to one connection.
///
/// Emits are queued in call order and written by a single writer task, so a
/// client sees events in the order they were emitted.
#[derive(Debug, Clone)]
pub struct Socket {
    id: Arc<str>,
    operator: Option<Arc<str>>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Socket {
    pub fn new(id: impl Into<Arc<str>>, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: id.into(),
            operator: None,
            tx,
        }
    }

    /// Attach the operator the connection was authorised for
    pub fn with_operator(mut self, operator: Option<String>) -> Self {
        self.operator = operator.map(Arc::from);
        self
    }

    /// Socket plus the receiving end its writer drains
    pub fn channel(id: impl Into<Arc<str>>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    /// Connection id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    /// Queue an event. Returns `false` once the connection is gone.
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> bool {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialize {} payload: {}", event, e);
                return false;
            }
        };

        trace!("emit {} -> {}", event, self.id);
        self.tx
            .send(Outbound::Event(OutboundEvent {
                event: event.to_string(),
                data,
            }))
            .is_ok()
    }

    /// Ask the writer to flush and close the connection
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
