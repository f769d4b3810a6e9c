//! Typed readings produced from raw SDR/FRU text each poll cycle.

use serde::{Deserialize, Serialize};

/// Which SDR sensor class to query via `ipmitool sdr type <...>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdrType {
    Temperature,
    Fan,
    Current,
}

impl SdrType {
    /// The `sdr type` argument ipmitool expects.
    pub fn as_arg(&self) -> &'static str {
        match self {
            SdrType::Temperature => "temperature",
            SdrType::Fan => "fan",
            SdrType::Current => "current",
        }
    }

    /// Per-command timeout in seconds. Fan and current tables respond
    /// faster than the full temperature table.
    pub fn timeout_secs(&self) -> u64 {
        match self {
            SdrType::Temperature => 15,
            SdrType::Fan | SdrType::Current => 10,
        }
    }
}

/// Categorized temperatures extracted from one temperature SDR dump.
///
/// `cpu_temps` keeps the order sensors appeared in the text. Inlet and
/// exhaust hold at most one value each (first match wins), and a line
/// claimed by either is never also counted as a CPU sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSet {
    pub cpu_temps: Vec<i32>,
    pub inlet_temp: Option<i32>,
    pub exhaust_temp: Option<i32>,
}

impl TemperatureSet {
    /// Hottest CPU temperature this cycle, or `None` when no CPU sensor
    /// matched. Absent is distinct from zero: the decision engine treats
    /// it as a sensor fault.
    pub fn hottest_cpu(&self) -> Option<i32> {
        self.cpu_temps.iter().max().copied()
    }
}

/// One fan tachometer reading. `name` is the raw trimmed sensor label as
/// the BMC reported it; slugifying happens at the MQTT layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanReading {
    pub name: String,
    pub rpm: u32,
}

/// Server make/model resolved from FRU data once at worker startup and
/// cached for the life of the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub manufacturer: String,
    pub model: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "Unknown".to_string(),
            model: "Unknown".to_string(),
        }
    }
}
