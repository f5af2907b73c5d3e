//! Dashboard: host metrics and the per-connection push ticker

mod metrics;
mod ticker;

pub use metrics::{
    format_bytes, local_ip, BasicSystemInfo, CpuMetric, DiskMetric, MemoryMetric,
    MetricsCollector, MetricsError, SysinfoCollector, SystemMetrics, FALLBACK_IP,
};
pub use ticker::{
    emit_metrics, format_refresh_rate, parse_refresh_rate, DashboardSession, BASIC_SYSTEM_INFO,
    DASHBOARD_ERROR, SYSTEM_METRICS,
};

#[cfg(test)]
pub(crate) use ticker::tests::{advance, FixedCollector};
