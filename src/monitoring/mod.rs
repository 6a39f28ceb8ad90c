pub mod endpoints;

use std::time::SystemTime;
use tracing::info;

static START_TIME: std::sync::OnceLock<SystemTime> = std::sync::OnceLock::new();

pub fn init_monitoring() {
    START_TIME.set(SystemTime::now()).ok();
    info!("🔍 Monitoring system initialized");
}

pub fn uptime_seconds() -> u64 {
    START_TIME
        .get()
        .and_then(|start| SystemTime::now().duration_since(*start).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
