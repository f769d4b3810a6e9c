//! Per-server status records and the shared snapshot written for the
//! dashboard to read.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::control::FanCommand;
use crate::ipmi::types::FanReading;

/// What the controller commanded this cycle: a static percent, or one of
/// the named auto modes. Serialized as a bare number or string so the
/// status file matches what consumers expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TargetFanSpeed {
    Percent(u8),
    Mode(String),
}

impl From<&FanCommand> for TargetFanSpeed {
    fn from(command: &FanCommand) -> Self {
        match command {
            FanCommand::StaticPercent(p) => TargetFanSpeed::Percent(*p),
            auto => TargetFanSpeed::Mode(auto.display()),
        }
    }
}

/// One server's most recent cycle, rebuilt from scratch every poll.
/// Absent readings stay absent rather than carrying stale values forward.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub alias: String,
    pub ip: String,
    pub cpu_temps_c: Vec<i32>,
    pub hottest_cpu_temp_c: Option<i32>,
    pub inlet_temp_c: Option<i32>,
    pub exhaust_temp_c: Option<i32>,
    pub power_consumption_watts: Option<u32>,
    pub actual_fan_rpms: Vec<FanReading>,
    pub target_fan_speed_percent: TargetFanSpeed,
    pub last_updated: String,
}

pub type SharedStatus = Arc<Mutex<HashMap<String, ServerStatus>>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(HashMap::new()))
}

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(2);

/// Periodically serialize the shared status map to `path` until the
/// running flag drops. Write failures are logged and retried next tick.
pub async fn run_snapshot_writer(status: SharedStatus, path: &Path, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        {
            let map = status.lock().await;
            let all: Vec<&ServerStatus> = map.values().collect();
            match serde_json::to_string_pretty(&all) {
                Ok(json) => {
                    if let Err(e) = tokio::fs::write(path, json).await {
                        warn!("Could not write status file {:?}: {}", path, e);
                    } else {
                        debug!("Status snapshot written for {} server(s)", all.len());
                    }
                }
                Err(e) => warn!("Could not serialize status snapshot: {}", e),
            }
        }
        tokio::time::sleep(SNAPSHOT_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::AutoReason;

    #[test]
    fn target_speed_serializes_as_number_or_string() {
        let percent = TargetFanSpeed::from(&FanCommand::StaticPercent(20));
        assert_eq!(serde_json::to_string(&percent).unwrap(), "20");

        let auto = TargetFanSpeed::from(&FanCommand::DellAuto(AutoReason::Critical));
        assert_eq!(serde_json::to_string(&auto).unwrap(), "\"Dell Auto (Critical)\"");
    }

    #[test]
    fn absent_readings_serialize_as_null() {
        let status = ServerStatus {
            alias: "r730".into(),
            ip: "10.0.0.120".into(),
            cpu_temps_c: vec![],
            hottest_cpu_temp_c: None,
            inlet_temp_c: None,
            exhaust_temp_c: None,
            power_consumption_watts: None,
            actual_fan_rpms: vec![],
            target_fan_speed_percent: TargetFanSpeed::Mode("Dell Auto (Safety)".into()),
            last_updated: "2026-01-01 00:00:00".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json["hottest_cpu_temp_c"].is_null());
        assert!(json["power_consumption_watts"].is_null());
    }
}
