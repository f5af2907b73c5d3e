//! Event Channel
//!
//! Thin JSON event transport over WebSocket with per-path namespaces, plus a
//! handful of plain HTTP routes on the same listener.

mod error;
mod http;
mod namespace;
mod protocol;
mod server;
mod socket;

pub use error::ChannelError;
pub use http::{json_response, HttpRequest, HttpResponse, HttpRoutes};
pub use namespace::{InboundEvent, Namespace};
pub use protocol::{decode_payload, unwrap_payload, InboundFrame, OutboundEvent};
pub use server::{EventServer, Middleware, PING_INTERVAL};
pub use socket::{Outbound, Socket};

#[cfg(test)]
pub(crate) mod testing {
    use super::{Outbound, OutboundEvent};
    use tokio::sync::mpsc;

    /// Every event queued so far
    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(outbound) = rx.try_recv() {
            if let Outbound::Event(event) = outbound {
                events.push(event);
            }
        }
        events
    }

    /// Names of every event queued so far
    pub(crate) fn drain_names(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        drain(rx).into_iter().map(|e| e.event).collect()
    }
}
