//! Dashboard ticker
//!
//! ```text
//! Idle ──rate > 0──► Running ──set_refresh_rate──► Idle ──► Running ...
//!   │                   │
//!   └──── cleanup ──────┴──► Closed
//! ```
//!
//! Each running ticker owns a [`CancellationToken`]. Replacing the rate
//! cancels the old token and clears the handle under the session mutex before
//! a new ticker starts, so at most one ticker per session can emit.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::{MetricsCollector, MetricsError, SystemMetrics};
use crate::channel::Socket;
use crate::session::ManagedSession;

pub const SYSTEM_METRICS: &str = "system_metrics";
pub const BASIC_SYSTEM_INFO: &str = "basic_system_info";
pub const DASHBOARD_ERROR: &str = "dashboard_error";

/// Longest accepted push interval (one day)
pub const MAX_REFRESH_SECS: u64 = 24 * 60 * 60;

/// Parse `"OFF"` or `"<N>s"` with `N <= MAX_REFRESH_SECS`. Zero means no
/// periodic push.
pub fn parse_refresh_rate(rate: &str) -> Option<Duration> {
    if rate == "OFF" {
        return Some(Duration::ZERO);
    }
    let seconds = rate.strip_suffix('s')?.parse::<u64>().ok()?;
    (seconds <= MAX_REFRESH_SECS).then(|| Duration::from_secs(seconds))
}

/// Inverse of [`parse_refresh_rate`]
pub fn format_refresh_rate(rate: Duration) -> String {
    if rate.is_zero() {
        "OFF".to_string()
    } else {
        format!("{}s", rate.as_secs())
    }
}

/// Emit one `system_metrics`, or `dashboard_error` if sampling fails
pub fn emit_metrics(socket: &Socket, sample: Result<SystemMetrics, MetricsError>) -> bool {
    match sample {
        Ok(metrics) => socket.emit(SYSTEM_METRICS, &metrics),
        Err(e) => {
            warn!("Metrics sample for {} failed: {}", socket.id(), e);
            socket.emit(
                DASHBOARD_ERROR,
                &format!("Failed to collect system metrics: {}", e),
            )
        }
    }
}

struct TickerState {
    refresh_rate: Duration,
    ticker: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    active: bool,
}

pub struct DashboardSession {
    connection_id: String,
    socket: Socket,
    collector: Arc<dyn MetricsCollector>,
    state: Mutex<TickerState>,
}

impl DashboardSession {
    pub fn new(
        socket: Socket,
        collector: Arc<dyn MetricsCollector>,
        refresh_rate: Duration,
    ) -> Self {
        Self {
            connection_id: socket.id().to_string(),
            socket,
            collector,
            state: Mutex::new(TickerState {
                refresh_rate,
                ticker: None,
                cancel: None,
                active: true,
            }),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub async fn refresh_rate(&self) -> Duration {
        self.state.lock().await.refresh_rate
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    /// A ticker task is installed and has not finished
    pub async fn is_ticking(&self) -> bool {
        let state = self.state.lock().await;
        state
            .ticker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn push_host_info(&self, username: &str) -> bool {
        let info = self.collector.host_info(username);
        self.socket.emit(BASIC_SYSTEM_INFO, &info)
    }

    pub fn push_metrics(&self) -> bool {
        emit_metrics(&self.socket, self.collector.sample())
    }

    /// Start the ticker at the current rate, if any
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.active {
            self.install_ticker(&mut state);
        }
    }

    /// Swap the push interval. Returns `false` if the session is closed.
    pub async fn set_refresh_rate(self: &Arc<Self>, rate: Duration) -> bool {
        let mut state = self.state.lock().await;
        if !state.active {
            return false;
        }

        stop_ticker(&mut state);
        state.refresh_rate = rate;
        self.install_ticker(&mut state);
        info!(
            "Dashboard {} refresh rate set to {}",
            self.connection_id,
            format_refresh_rate(rate)
        );
        true
    }

    fn install_ticker(self: &Arc<Self>, state: &mut TickerState) {
        stop_ticker(state);
        if state.refresh_rate.is_zero() {
            return;
        }

        let period = state.refresh_rate;
        let Some(start) = Instant::now().checked_add(period) else {
            warn!(
                "Dashboard {} refresh rate {:?} out of range, not ticking",
                self.connection_id, period
            );
            return;
        };

        let token = CancellationToken::new();
        state.ticker = Some(tokio::spawn(run_ticker(
            Arc::downgrade(self),
            start,
            period,
            token.clone(),
        )));
        state.cancel = Some(token);
    }
}

fn stop_ticker(state: &mut TickerState) {
    if let Some(token) = state.cancel.take() {
        token.cancel();
    }
    // The task exits on its own once it sees the cancelled token
    state.ticker = None;
}

async fn run_ticker(
    session: Weak<DashboardSession>,
    start: Instant,
    period: Duration,
    token: CancellationToken,
) {
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(session) = session.upgrade() else {
            break;
        };
        let sample = session.collector.sample();

        let state = session.state.lock().await;
        if !state.active || token.is_cancelled() {
            break;
        }
        if !emit_metrics(&session.socket, sample) {
            debug!("Dashboard {} connection gone", session.connection_id);
            break;
        }
    }
}

#[async_trait]
impl ManagedSession for DashboardSession {
    async fn deactivate(&self) {
        let mut state = self.state.lock().await;
        state.active = false;
        if let Some(token) = state.cancel.as_ref() {
            token.cancel();
        }
    }

    async fn teardown(&self) {
        let handle = {
            let mut state = self.state.lock().await;
            state.active = false;
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.ticker.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Ticker for {} failed: {}", self.connection_id, e);
            }
        }
        debug!("Dashboard session {} closed", self.connection_id);
    }
}
