//! Dependency health monitoring.

pub mod monitor;

pub use monitor::{HealthMonitor, HealthSnapshot, MonitorConfig};
