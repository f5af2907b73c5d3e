//! Namespace handlers
//!
//! One module per event channel namespace.

pub mod dashboard;
pub mod ssh;

pub use dashboard::{DashboardEvent, DashboardNamespace};
pub use ssh::{ConnectRequest, SshEvent, SshNamespace};
