//! Home Assistant MQTT telemetry: discovery, per-sensor states, and the
//! availability channel.
//!
//! Each worker owns one publisher. The discovered-slug set lives here, not
//! in the poll cycle: it only exists to avoid re-sending discovery configs,
//! and re-announcing an entity is harmless anyway.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, LastWill, MqttOptions, QoS};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::config::types::MqttSettings;
use crate::ipmi::types::ServerIdentity;
use crate::status::{ServerStatus, TargetFanSpeed};

/// Telemetry sink consumed by the poll cycle. Trait-shaped so worker tests
/// can record what a cycle emitted without a broker.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Attach device metadata used in discovery payloads. Called once per
    /// worker after the server identity is resolved.
    async fn announce_device(&mut self, identity: &ServerIdentity);
    async fn set_availability(&mut self, online: bool);
    async fn publish_status(&mut self, status: &ServerStatus);
    async fn shutdown(&mut self);
}

/// Replace anything outside `[a-zA-Z0-9_-]` so aliases are safe in topics
/// and unique ids.
pub fn sanitize_alias(alias: &str) -> String {
    let mut out = String::with_capacity(alias.len());
    let mut last_was_sub = false;
    for c in alias.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            out.push('_');
            last_was_sub = true;
        }
    }
    out
}

/// Fan entity slug from the raw sensor label: strip everything that is not
/// alphanumeric, lowercase the rest ("Fan1A Tach" becomes "fan1atach").
pub fn fan_slug(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!("fan_{}_rpm", cleaned.to_lowercase())
}

struct SensorMeta {
    component: &'static str,
    name: String,
    device_class: Option<&'static str>,
    unit: Option<&'static str>,
    icon: Option<&'static str>,
    state_class: Option<&'static str>,
}

impl SensorMeta {
    fn sensor(name: impl Into<String>) -> Self {
        Self {
            component: "sensor",
            name: name.into(),
            device_class: None,
            unit: None,
            icon: None,
            state_class: None,
        }
    }

    fn temperature(name: impl Into<String>) -> Self {
        Self {
            device_class: Some("temperature"),
            unit: Some("°C"),
            ..Self::sensor(name)
        }
    }
}

pub struct MqttPublisher {
    client: AsyncClient,
    base_topic: String,
    device_id: String,
    alias: String,
    device: Option<Value>,
    discovered: HashSet<String>,
}

impl MqttPublisher {
    /// Build the client and spawn its event loop driver. The connection
    /// itself is established lazily by rumqttc; broker errors surface as
    /// warnings from the driver task and publishes are retried by the
    /// next cycle.
    pub fn connect(settings: &MqttSettings, alias: &str) -> Self {
        let safe_alias = sanitize_alias(alias);
        let base_topic = format!("ha_idrac_controller/{}", safe_alias);
        let device_id = format!("idrac_controller_{}", safe_alias);

        let mut options = MqttOptions::new(
            format!("ha_idrac_{}", safe_alias),
            settings.host.clone(),
            settings.port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        if !settings.username.is_empty() {
            options.set_credentials(settings.username.clone(), settings.password.clone());
        }
        options.set_last_will(LastWill::new(
            format!("{}/status", base_topic),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        let driver_alias = safe_alias.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => trace!("[{}] MQTT event: {:?}", driver_alias, event),
                    Err(ConnectionError::RequestsDone) => {
                        debug!("[{}] MQTT event loop finished", driver_alias);
                        break;
                    }
                    Err(e) => {
                        warn!("[{}] MQTT connection error: {}", driver_alias, e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Self {
            client,
            base_topic,
            device_id,
            alias: alias.to_string(),
            device: None,
            discovered: HashSet::new(),
        }
    }

    fn availability_topic(&self) -> String {
        format!("{}/status", self.base_topic)
    }

    fn state_topic(&self, slug: &str) -> String {
        format!("{}/sensor/{}/state", self.base_topic, slug)
    }

    async fn publish(&self, topic: String, payload: String, retain: bool) {
        let qos = if retain { QoS::AtLeastOnce } else { QoS::AtMostOnce };
        if let Err(e) = self.client.publish(topic.clone(), qos, retain, payload).await {
            warn!("[{}] Failed to publish to {}: {}", self.alias, topic, e);
        }
    }

    /// Send the retained discovery config for `slug` once per process
    /// lifetime. Home Assistant tolerates repeats; the set just avoids
    /// the traffic.
    async fn ensure_discovery(&mut self, slug: &str, meta: &SensorMeta) {
        if self.discovered.contains(slug) {
            return;
        }
        let Some(device) = self.device.clone() else {
            warn!("[{}] Device info not set; skipping discovery for {}", self.alias, slug);
            return;
        };

        let mut payload = json!({
            "name": meta.name,
            "unique_id": format!("{}_{}", self.device_id, slug),
            "device": device,
            "availability_topic": self.availability_topic(),
            "payload_available": "online",
            "payload_not_available": "offline",
        });
        if meta.component == "binary_sensor" {
            // Connectivity mirrors the availability channel directly.
            payload["state_topic"] = json!(self.availability_topic());
            payload["payload_on"] = json!("online");
            payload["payload_off"] = json!("offline");
        } else {
            payload["state_topic"] = json!(self.state_topic(slug));
        }
        if let Some(v) = meta.device_class {
            payload["device_class"] = json!(v);
        }
        if let Some(v) = meta.unit {
            payload["unit_of_measurement"] = json!(v);
        }
        if let Some(v) = meta.icon {
            payload["icon"] = json!(v);
        }
        if let Some(v) = meta.state_class {
            payload["state_class"] = json!(v);
        }

        let config_topic = format!(
            "homeassistant/{}/{}/{}/config",
            meta.component, self.device_id, slug
        );
        self.publish(config_topic, payload.to_string(), true).await;
        self.discovered.insert(slug.to_string());
        debug!("[{}] Published discovery for '{}'", self.alias, slug);
    }

    async fn publish_state(&self, slug: &str, value: Value) {
        self.publish(self.state_topic(slug), value.to_string(), false).await;
    }
}

fn opt_json<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

#[async_trait]
impl StatusPublisher for MqttPublisher {
    async fn announce_device(&mut self, identity: &ServerIdentity) {
        let model = if identity.model == "Unknown" {
            "PowerEdge Server"
        } else {
            identity.model.as_str()
        };
        let manufacturer = if identity.manufacturer == "Unknown" {
            "DELL"
        } else {
            identity.manufacturer.as_str()
        };
        self.device = Some(json!({
            "identifiers": [self.device_id],
            "name": format!("iDRAC ({})", self.alias),
            "model": model,
            "manufacturer": manufacturer,
        }));
        debug!("[{}] MQTT device metadata set", self.alias);
    }

    async fn set_availability(&mut self, online: bool) {
        let payload = if online { "online" } else { "offline" };
        self.publish(self.availability_topic(), payload.to_string(), true).await;
    }

    async fn publish_status(&mut self, status: &ServerStatus) {
        self.ensure_discovery(
            "connectivity",
            &SensorMeta {
                component: "binary_sensor",
                name: "Status".into(),
                device_class: Some("connectivity"),
                unit: None,
                icon: None,
                state_class: None,
            },
        )
        .await;
        self.ensure_discovery("hottest_cpu_temp", &SensorMeta::temperature("Hottest CPU Temp"))
            .await;
        self.ensure_discovery("inlet_temp", &SensorMeta::temperature("Inlet Temperature"))
            .await;
        self.ensure_discovery("exhaust_temp", &SensorMeta::temperature("Exhaust Temperature"))
            .await;
        self.ensure_discovery(
            "power",
            &SensorMeta {
                device_class: Some("power"),
                unit: Some("W"),
                icon: Some("mdi:flash"),
                state_class: Some("measurement"),
                ..SensorMeta::sensor("Power Consumption")
            },
        )
        .await;
        self.ensure_discovery(
            "target_fan_speed",
            &SensorMeta {
                unit: Some("%"),
                icon: Some("mdi:fan-chevron-up"),
                ..SensorMeta::sensor("Target Fan Speed")
            },
        )
        .await;
        for i in 0..status.cpu_temps_c.len() {
            self.ensure_discovery(
                &format!("cpu_{}_temp", i),
                &SensorMeta::temperature(format!("CPU {} Temperature", i)),
            )
            .await;
        }
        for fan in &status.actual_fan_rpms {
            self.ensure_discovery(
                &fan_slug(&fan.name),
                &SensorMeta {
                    unit: Some("RPM"),
                    icon: Some("mdi:fan"),
                    ..SensorMeta::sensor(format!("{} RPM", fan.name))
                },
            )
            .await;
        }

        self.publish_state("hottest_cpu_temp", opt_json(status.hottest_cpu_temp_c)).await;
        self.publish_state("inlet_temp", opt_json(status.inlet_temp_c)).await;
        self.publish_state("exhaust_temp", opt_json(status.exhaust_temp_c)).await;
        self.publish_state("power", opt_json(status.power_consumption_watts)).await;
        // Auto modes have no numeric speed; the entity reads unknown then.
        let target = match &status.target_fan_speed_percent {
            TargetFanSpeed::Percent(p) => json!(p),
            TargetFanSpeed::Mode(_) => Value::Null,
        };
        self.publish_state("target_fan_speed", target).await;
        for (i, temp) in status.cpu_temps_c.iter().enumerate() {
            self.publish_state(&format!("cpu_{}_temp", i), json!(temp)).await;
        }
        for fan in &status.actual_fan_rpms {
            self.publish_state(&fan_slug(&fan.name), json!(fan.rpm)).await;
        }
    }

    async fn shutdown(&mut self) {
        self.set_availability(false).await;
        if let Err(e) = self.client.disconnect().await {
            debug!("[{}] MQTT disconnect: {}", self.alias, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_slugs_drop_spaces_and_lowercase() {
        assert_eq!(fan_slug("Fan1A Tach"), "fan_fan1atach_rpm");
        assert_eq!(fan_slug("Fan Mod2B"), "fan_fanmod2b_rpm");
    }

    #[test]
    fn aliases_are_sanitized_for_topics() {
        assert_eq!(sanitize_alias("rack 1/r730"), "rack_1_r730");
        assert_eq!(sanitize_alias("r730-prod"), "r730-prod");
    }
}
