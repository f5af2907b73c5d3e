//! Host metrics collection
//!
//! [`MetricsCollector`] is the seam between the dashboard and the machine it
//! runs on. [`SysinfoCollector`] reads the local host through `sysinfo`.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};
use tracing::debug;

/// Reported when no route probe succeeds
pub const FALLBACK_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Address used to pick the outbound interface; nothing is sent to it
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("no CPU information available")]
    NoCpu,

    #[error("no disk mounted at {0}")]
    NoDisk(String),
}

/// One-time host description sent on `connect_dashboard`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicSystemInfo {
    pub hostname: String,
    pub os: String,
    pub ip: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuMetric {
    pub usage: f64,
    pub model: String,
    pub cores: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryMetric {
    pub used: String,
    pub total: String,
    pub used_percent: f64,
    pub swap: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskMetric {
    pub used: String,
    pub total: String,
    pub used_percent: f64,
}

/// Payload of `system_metrics`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub cpu: CpuMetric,
    pub memory: MemoryMetric,
    pub disk: DiskMetric,
}

pub trait MetricsCollector: Send + Sync + 'static {
    fn host_info(&self, username: &str) -> BasicSystemInfo;

    fn sample(&self) -> Result<SystemMetrics, MetricsError>;
}

/// Local host collector.
///
/// CPU usage is measured between consecutive samples, so the first sample
/// after construction reads close to zero.
pub struct SysinfoCollector {
    system: Mutex<System>,
    disk_path: PathBuf,
}

impl Default for SysinfoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoCollector {
    pub fn new() -> Self {
        Self::with_disk_path("/")
    }

    /// Report disk usage for the filesystem holding `path`
    pub fn with_disk_path(path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            disk_path: path.into(),
        }
    }

    fn disk(&self) -> Result<DiskMetric, MetricsError> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|disk| self.disk_path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| MetricsError::NoDisk(self.disk_path.display().to_string()))?;

        let total = disk.total_space();
        let used = total.saturating_sub(disk.available_space());
        Ok(DiskMetric {
            used: format_bytes(used),
            total: format_bytes(total),
            used_percent: percent(used, total),
        })
    }
}

impl MetricsCollector for SysinfoCollector {
    fn host_info(&self, username: &str) -> BasicSystemInfo {
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        BasicSystemInfo {
            hostname,
            os: System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
            ip: local_ip().unwrap_or(FALLBACK_IP).to_string(),
            username: username.to_string(),
        }
    }

    fn sample(&self) -> Result<SystemMetrics, MetricsError> {
        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();

            let cpus = system.cpus();
            let first = cpus.first().ok_or(MetricsError::NoCpu)?;
            let cpu = CpuMetric {
                usage: f64::from(system.global_cpu_usage()),
                model: first.brand().trim().to_string(),
                cores: cpus.len(),
            };

            let total = system.total_memory();
            let used = system.used_memory();
            let memory = MemoryMetric {
                used: format_bytes(used),
                total: format_bytes(total),
                used_percent: percent(used, total),
                swap: format_bytes(system.total_swap()),
            };
            (cpu, memory)
        };

        Ok(SystemMetrics {
            cpu,
            memory,
            disk: self.disk()?,
        })
    }
}

/// Address of the interface the default route leaves through
pub fn local_ip() -> Option<IpAddr> {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(ROUTE_PROBE)?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => Some(ip),
        Ok(_) => None,
        Err(e) => {
            debug!("Route probe failed: {}", e);
            None
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// Binary units with one rounded decimal: `"512 B"`, `"1.5 GiB"`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(u32, &str); 4] = [(40, "TiB"), (30, "GiB"), (20, "MiB"), (10, "KiB")];

    for (shift, unit) in UNITS {
        if bytes >= 1u64 << shift {
            let mut whole = bytes >> shift;
            let rest = u128::from(bytes & ((1u64 << shift) - 1));
            let mut tenth = (rest * 10 + (1u128 << (shift - 1))) >> shift;
            if tenth == 10 {
                tenth = 0;
                whole += 1;
            }
            return format!("{}.{} {}", whole, tenth, unit);
        }
    }
    format!("{} B", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3u64 << 29), "1.5 GiB");
        assert_eq!(format_bytes(5u64 << 40), "5.0 TiB");
    }

    #[test]
    fn test_format_bytes_rounds_up_into_next_whole() {
        // 1023.96 KiB rounds to 1024.0, not 1023.10
        assert_eq!(format_bytes((1u64 << 20) - 40), "1024.0 KiB");
        assert_eq!(format_bytes((1u64 << 20) - 60), "1023.9 KiB");
    }

    #[test]
    fn test_percent_of_zero() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn test_host_info_carries_username() {
        let info = SysinfoCollector::new().host_info("alice");
        assert_eq!(info.username, "alice");
        assert!(!info.hostname.is_empty());
        assert!(info.ip.parse::<IpAddr>().is_ok());
    }

    #[test]
    fn test_metrics_serialize_shape() {
        let metrics = SystemMetrics {
            cpu: CpuMetric {
                usage: 12.5,
                model: "Test CPU".to_string(),
                cores: 4,
            },
            memory: MemoryMetric {
                used: format_bytes(1u64 << 30),
                total: format_bytes(4u64 << 30),
                used_percent: 25.0,
                swap: format_bytes(0),
            },
            disk: DiskMetric {
                used: "1.0 GiB".to_string(),
                total: "2.0 GiB".to_string(),
                used_percent: 50.0,
            },
        };

        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["cpu"]["cores"], 4);
        assert_eq!(value["memory"]["total"], "4.0 GiB");
        assert_eq!(value["memory"]["swap"], "0 B");
        assert_eq!(value["disk"]["used_percent"], 50.0);
    }
}
