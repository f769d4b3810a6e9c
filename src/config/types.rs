//! Controller configuration structs and defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub global: GlobalSettings,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_status_file")]
    pub status_file: String,
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub default_thresholds: ThresholdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Fan control thresholds. Ordering (`low < critical`) is the caller's
/// responsibility; the decision engine defines the degenerate behavior
/// for out-of-order values rather than rejecting them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub base_fan_percent: u8,
    pub low_temp_threshold_c: f64,
    pub high_temp_fan_percent: u8,
    pub critical_temp_threshold_c: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            base_fan_percent: 20,
            low_temp_threshold_c: 45.0,
            high_temp_fan_percent: 50,
            critical_temp_threshold_c: 65.0,
        }
    }
}

/// Per-server overrides; any field left unset falls back to the global
/// default thresholds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    pub base_fan_percent: Option<u8>,
    pub low_temp_threshold_c: Option<f64>,
    pub high_temp_fan_percent: Option<u8>,
    pub critical_temp_threshold_c: Option<f64>,
}

impl ThresholdOverrides {
    pub fn resolve(&self, defaults: &ThresholdConfig) -> ThresholdConfig {
        ThresholdConfig {
            base_fan_percent: self.base_fan_percent.unwrap_or(defaults.base_fan_percent),
            low_temp_threshold_c: self
                .low_temp_threshold_c
                .unwrap_or(defaults.low_temp_threshold_c),
            high_temp_fan_percent: self
                .high_temp_fan_percent
                .unwrap_or(defaults.high_temp_fan_percent),
            critical_temp_threshold_c: self
                .critical_temp_threshold_c
                .unwrap_or(defaults.critical_temp_threshold_c),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub alias: String,
    pub idrac_ip: String,
    pub idrac_username: String,
    pub idrac_password: String,
    /// "lanplus" (default) for remote iDRAC access, "local"/"open" for the
    /// host's own /dev/ipmi0 interface.
    #[serde(default = "default_conn_type")]
    pub conn_type: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub thresholds: ThresholdOverrides,
    /// Sensor-name categorization patterns, substring-searched against the
    /// SDR name field.
    #[serde(default = "default_cpu_pattern")]
    pub cpu_pattern: String,
    #[serde(default = "default_inlet_pattern")]
    pub inlet_pattern: String,
    #[serde(default = "default_exhaust_pattern")]
    pub exhaust_pattern: String,
}

impl ServerConfig {
    /// Credentials are required for lanplus access; local access needs none.
    pub fn has_required_credentials(&self) -> bool {
        let local = matches!(self.conn_type.to_lowercase().as_str(), "local" | "open");
        local
            || (!self.idrac_ip.is_empty()
                && !self.idrac_username.is_empty()
                && !self.idrac_password.is_empty())
    }
}

fn default_check_interval() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_status_file() -> String { "/data/current_status.json".to_string() }
fn default_mqtt_host() -> String { "core-mosquitto".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_conn_type() -> String { "lanplus".to_string() }
fn default_cpu_pattern() -> String { "Temp".to_string() }
fn default_inlet_pattern() -> String { "Inlet Temp".to_string() }
fn default_exhaust_pattern() -> String { "Exhaust Temp".to_string() }

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            global: GlobalSettings {
                check_interval_seconds: default_check_interval(),
                log_level: default_log_level(),
                status_file: default_status_file(),
                mqtt: MqttSettings {
                    host: default_mqtt_host(),
                    port: default_mqtt_port(),
                    username: String::new(),
                    password: String::new(),
                },
                default_thresholds: ThresholdConfig::default(),
            },
            servers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_fall_back_per_field() {
        let defaults = ThresholdConfig::default();
        let overrides = ThresholdOverrides {
            high_temp_fan_percent: Some(70),
            ..Default::default()
        };
        let resolved = overrides.resolve(&defaults);
        assert_eq!(resolved.high_temp_fan_percent, 70);
        assert_eq!(resolved.base_fan_percent, defaults.base_fan_percent);
        assert_eq!(resolved.low_temp_threshold_c, defaults.low_temp_threshold_c);
    }

    #[test]
    fn minimal_server_entry_gets_defaults() {
        let json = r#"{
            "alias": "r730",
            "idrac_ip": "10.0.0.120",
            "idrac_username": "root",
            "idrac_password": "calvin",
            "enabled": true
        }"#;
        let server: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(server.conn_type, "lanplus");
        assert_eq!(server.cpu_pattern, "Temp");
        assert_eq!(server.inlet_pattern, "Inlet Temp");
        assert!(server.has_required_credentials());
    }

    #[test]
    fn local_access_needs_no_credentials() {
        let json = r#"{
            "alias": "local",
            "idrac_ip": "",
            "idrac_username": "",
            "idrac_password": "",
            "conn_type": "open",
            "enabled": true
        }"#;
        let server: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(server.has_required_credentials());
    }

    #[test]
    fn missing_credentials_detected_for_lanplus() {
        let json = r#"{
            "alias": "bad",
            "idrac_ip": "10.0.0.9",
            "idrac_username": "root",
            "idrac_password": "",
            "enabled": true
        }"#;
        let server: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(!server.has_required_credentials());
    }
}
