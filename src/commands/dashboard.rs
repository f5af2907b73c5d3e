//! `/dashboard` namespace
//!
//! | in                  | out                                        |
//! |---------------------|--------------------------------------------|
//! | `connect_dashboard` | `dashboard_connected`, `basic_system_info` |
//! | `set_refresh_rate`  | `refresh_rate_updated`                     |
//! | `refresh_data`      | `system_metrics` or `dashboard_error`      |
//! | `disconnect`        | `dashboard_error`                          |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::channel::{decode_payload, ChannelError, InboundEvent, Namespace, Socket};
use crate::dashboard::{
    format_refresh_rate, parse_refresh_rate, DashboardSession, MetricsCollector, DASHBOARD_ERROR,
};
use crate::session::{ManagedSession, SessionRegistry};

pub const DASHBOARD_CONNECTED: &str = "dashboard_connected";
pub const REFRESH_RATE_UPDATED: &str = "refresh_rate_updated";

/// Reported in `basic_system_info` when the connection carries no operator
pub const DEFAULT_OPERATOR: &str = "Administrator";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardConnected {
    pub refresh_rate: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshRateUpdated {
    pub rate: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardEvent {
    Connect,
    SetRefreshRate(String),
    RefreshData,
}

impl InboundEvent for DashboardEvent {
    fn decode(name: &str, data: Value) -> Result<Self, ChannelError> {
        match name {
            "connect_dashboard" => Ok(DashboardEvent::Connect),
            "refresh_data" => Ok(DashboardEvent::RefreshData),
            "set_refresh_rate" => {
                if data.is_null() {
                    return Err(ChannelError::MalformedPayload(
                        "No refresh rate data provided".to_string(),
                    ));
                }
                let fields: Map<String, Value> =
                    decode_payload(data, "Invalid refresh rate data format")?;
                match fields.get("rate").and_then(Value::as_str) {
                    Some(rate) if !rate.is_empty() => {
                        Ok(DashboardEvent::SetRefreshRate(rate.to_string()))
                    }
                    _ => Err(ChannelError::MalformedPayload(
                        "Refresh rate is required".to_string(),
                    )),
                }
            }
            other => Err(ChannelError::UnknownEvent(other.to_string())),
        }
    }
}

/// Handlers for the `/dashboard` namespace
pub struct DashboardNamespace {
    registry: Arc<SessionRegistry<DashboardSession>>,
    collector: Arc<dyn MetricsCollector>,
    default_rate: Duration,
}

impl DashboardNamespace {
    pub fn new(
        registry: Arc<SessionRegistry<DashboardSession>>,
        collector: Arc<dyn MetricsCollector>,
        default_rate: Duration,
    ) -> Self {
        Self {
            registry,
            collector,
            default_rate,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<DashboardSession>> {
        &self.registry
    }

    async fn connect(&self, socket: &Socket) {
        if self.registry.cleanup(socket.id()).await {
            info!("Replacing existing dashboard session for {}", socket.id());
        }

        let session = Arc::new(DashboardSession::new(
            socket.clone(),
            self.collector.clone(),
            self.default_rate,
        ));
        if let Some(previous) = self.registry.replace(socket.id(), session.clone()).await {
            previous.teardown().await;
        }

        socket.emit(
            DASHBOARD_CONNECTED,
            &DashboardConnected {
                refresh_rate: format_refresh_rate(self.default_rate),
                status: "connected",
            },
        );
        session.push_host_info(socket.operator().unwrap_or(DEFAULT_OPERATOR));
        session.push_metrics();
        session.start().await;
        info!("Dashboard {} connected", socket.id());
    }

    async fn set_refresh_rate(&self, socket: &Socket, rate: String) {
        let Some(session) = self.registry.get(socket.id()).await else {
            socket.emit(DASHBOARD_ERROR, "No active dashboard session");
            return;
        };
        let Some(period) = parse_refresh_rate(&rate) else {
            socket.emit(DASHBOARD_ERROR, "Invalid refresh rate format");
            return;
        };
        if !session.set_refresh_rate(period).await {
            socket.emit(DASHBOARD_ERROR, "No active dashboard session");
            return;
        }
        socket.emit(REFRESH_RATE_UPDATED, &RefreshRateUpdated { rate });
    }

    async fn refresh_data(&self, socket: &Socket) {
        match self.registry.get(socket.id()).await {
            Some(session) => {
                session.push_metrics();
            }
            None => {
                socket.emit(DASHBOARD_ERROR, "No active dashboard session");
            }
        }
    }
}

#[async_trait]
impl Namespace for DashboardNamespace {
    type Event = DashboardEvent;

    fn error_event(&self) -> &'static str {
        DASHBOARD_ERROR
    }

    async fn on_event(&self, socket: &Socket, event: DashboardEvent) {
        match event {
            DashboardEvent::Connect => self.connect(socket).await,
            DashboardEvent::SetRefreshRate(rate) => self.set_refresh_rate(socket, rate).await,
            DashboardEvent::RefreshData => self.refresh_data(socket).await,
        }
    }

    async fn on_disconnect(&self, socket: &Socket) {
        self.registry.cleanup(socket.id()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{drain, drain_names};
    use crate::channel::Outbound;
    use crate::dashboard::{advance, FixedCollector, BASIC_SYSTEM_INFO, SYSTEM_METRICS};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn namespace() -> DashboardNamespace {
        DashboardNamespace::new(
            Arc::new(SessionRegistry::new("dashboard")),
            Arc::new(FixedCollector::default()),
            Duration::from_secs(10),
        )
    }

    fn rate(value: &str) -> DashboardEvent {
        DashboardEvent::SetRefreshRate(value.to_string())
    }

    async fn connected(ns: &DashboardNamespace) -> (Socket, mpsc::UnboundedReceiver<Outbound>) {
        let (socket, mut rx) = Socket::channel("d1");
        ns.on_event(&socket, DashboardEvent::Connect).await;
        drain(&mut rx);
        (socket, rx)
    }

    #[test]
    fn test_decode_set_refresh_rate() {
        assert_eq!(
            DashboardEvent::decode("set_refresh_rate", json!({"rate": "5s"})).unwrap(),
            rate("5s")
        );
        for (data, message) in [
            (Value::Null, "No refresh rate data provided"),
            (json!("5s"), "Invalid refresh rate data format"),
            (json!({}), "Refresh rate is required"),
            (json!({"rate": 5}), "Refresh rate is required"),
        ] {
            match DashboardEvent::decode("set_refresh_rate", data) {
                Err(ChannelError::MalformedPayload(m)) => assert_eq!(m, message),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_sequence_then_periodic_push() {
        let ns = namespace();
        let (socket, mut rx) = Socket::channel("d1");

        ns.on_event(&socket, DashboardEvent::Connect).await;

        let events = drain(&mut rx);
        let names: Vec<_> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            names,
            vec![DASHBOARD_CONNECTED, BASIC_SYSTEM_INFO, SYSTEM_METRICS]
        );
        assert_eq!(
            events[0].data,
            json!({"refresh_rate": "10s", "status": "connected"})
        );
        assert_eq!(events[1].data["username"], DEFAULT_OPERATOR);

        advance(Duration::from_secs(10)).await;
        assert_eq!(drain_names(&mut rx), vec![SYSTEM_METRICS]);
        advance(Duration::from_secs(10)).await;
        assert_eq!(drain_names(&mut rx), vec![SYSTEM_METRICS]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_info_reports_operator() {
        let ns = namespace();
        let (socket, mut rx) = Socket::channel("d1");
        let socket = socket.with_operator(Some("alice".to_string()));

        ns.on_event(&socket, DashboardEvent::Connect).await;

        let info = drain(&mut rx)
            .into_iter()
            .find(|e| e.event == BASIC_SYSTEM_INFO)
            .unwrap();
        assert_eq!(info.data["username"], "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_off_silences_ticker() {
        let ns = namespace();
        let (socket, mut rx) = connected(&ns).await;

        ns.on_event(&socket, rate("5s")).await;
        ns.on_event(&socket, rate("OFF")).await;
        assert_eq!(
            drain(&mut rx)
                .into_iter()
                .map(|e| e.data)
                .collect::<Vec<_>>(),
            vec![json!({"rate": "5s"}), json!({"rate": "OFF"})]
        );

        advance(Duration::from_secs(30)).await;
        assert!(drain_names(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_from_off_to_three_seconds() {
        let ns = namespace();
        let (socket, mut rx) = connected(&ns).await;

        ns.on_event(&socket, rate("OFF")).await;
        ns.on_event(&socket, rate("3s")).await;
        assert_eq!(
            drain_names(&mut rx),
            vec![REFRESH_RATE_UPDATED, REFRESH_RATE_UPDATED]
        );

        for _ in 0..3 {
            advance(Duration::from_secs(3)).await;
            assert_eq!(drain_names(&mut rx), vec![SYSTEM_METRICS]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_rate_keeps_current_ticker() {
        let ns = namespace();
        let (socket, mut rx) = connected(&ns).await;

        ns.on_event(&socket, rate("fast")).await;
        assert_eq!(
            drain(&mut rx)[0].data,
            json!("Invalid refresh rate format")
        );

        advance(Duration::from_secs(10)).await;
        assert_eq!(drain_names(&mut rx), vec![SYSTEM_METRICS]);
    }

    #[tokio::test]
    async fn test_rate_without_session() {
        let ns = namespace();
        let (socket, mut rx) = Socket::channel("d1");

        ns.on_event(&socket, rate("5s")).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, DASHBOARD_ERROR);
        assert_eq!(events[0].data, json!("No active dashboard session"));
    }

    #[tokio::test]
    async fn test_refresh_data_without_session() {
        let ns = namespace();
        let (socket, mut rx) = Socket::channel("d1");

        ns.on_event(&socket, DashboardEvent::RefreshData).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, DASHBOARD_ERROR);
        assert_eq!(events[0].data, json!("No active dashboard session"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_data_pushes_once() {
        let ns = namespace();
        let (socket, mut rx) = connected(&ns).await;
        drain(&mut rx);

        ns.on_event(&socket, DashboardEvent::RefreshData).await;

        assert_eq!(drain_names(&mut rx), vec![SYSTEM_METRICS]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_rate_is_rejected() {
        let ns = namespace();
        let (socket, mut rx) = connected(&ns).await;
        drain(&mut rx);

        ns.on_event(&socket, rate("18446744073709551615s")).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, DASHBOARD_ERROR);
        assert_eq!(events[0].data, json!("Invalid refresh rate format"));
        let session = ns.registry().get("d1").await.unwrap();
        assert_eq!(session.refresh_rate().await, Duration::from_secs(10));
        assert!(session.is_ticking().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_pushes_and_removes_session() {
        let ns = namespace();
        let (socket, mut rx) = connected(&ns).await;
        let session = ns.registry().get("d1").await.unwrap();

        ns.on_disconnect(&socket).await;

        assert!(ns.registry().is_empty().await);
        assert!(!session.is_active().await);
        assert!(!session.is_ticking().await);
        advance(Duration::from_secs(30)).await;
        assert!(drain_names(&mut rx).is_empty());
    }
}
