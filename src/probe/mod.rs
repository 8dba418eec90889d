//! Health probing

mod http;
mod monitor;

pub use http::{HealthCheck, HttpProbe, ProbeResult, ProbeTarget};
pub use monitor::{
    HealthMonitor, HealthState, HealthStatus, MonitorHandle, MonitorSettings, HEALTH_LOG_LEN,
};

use crate::error::Result;

/// Probe a target once
pub fn probe_once(target: &ProbeTarget) -> Result<ProbeResult> {
    Ok(HttpProbe::new(target)?.check())
}
