use crate::hass_mqtt::base::{Device, EntityConfig, Origin};
use crate::hass_mqtt::instance::{publish_entity_config, EntityInstance};
use crate::service::hass::{availability_topic, topic_safe_string, HassClient};
use crate::service::state::StateHandle;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Serialize, Clone, Debug)]
pub struct SensorConfig {
    #[serde(flatten)]
    pub base: EntityConfig,

    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
}

impl SensorConfig {
    pub async fn publish(&self, state: &StateHandle, client: &HassClient) -> anyhow::Result<()> {
        publish_entity_config("sensor", state, client, &self.base, self).await
    }

    pub async fn notify_state(&self, client: &HassClient, value: &str) -> anyhow::Result<()> {
        client.publish(&self.state_topic, value).await
    }
}

/// A diagnostic sensor attached to the bridge itself, whose
/// value never changes while we are running
#[derive(Clone)]
pub struct GlobalFixedDiagnostic {
    sensor: SensorConfig,
    value: String,
}

#[async_trait]
impl EntityInstance for GlobalFixedDiagnostic {
    async fn publish_config(&self, state: &StateHandle, client: &HassClient) -> anyhow::Result<()> {
        self.sensor.publish(state, client).await
    }

    async fn notify_state(&self, client: &HassClient) -> anyhow::Result<()> {
        self.sensor.notify_state(client, &self.value).await
    }
}

impl GlobalFixedDiagnostic {
    pub fn new<NAME: Into<String>, VALUE: Into<String>>(name: NAME, value: VALUE) -> Self {
        let name = name.into();
        let unique_id = format!("st2mqtt-global-{}", topic_safe_string(&name));

        Self {
            sensor: SensorConfig {
                base: EntityConfig {
                    availability_topic: availability_topic(),
                    name: Some(name),
                    entity_category: Some("diagnostic".to_string()),
                    origin: Origin::default(),
                    device: Device::this_service(),
                    unique_id: unique_id.clone(),
                    device_class: None,
                    icon: None,
                },
                state_topic: format!("st2mqtt/sensor/{unique_id}/state"),
                unit_of_measurement: None,
            },
            value: value.into(),
        }
    }
}

#[cfg(test)]
#[test]
fn test_global_diagnostic_config() {
    let diag = GlobalFixedDiagnostic::new("Version", "1.2.3");
    let config = serde_json::to_value(&diag.sensor).unwrap();
    assert_eq!(config["unique_id"], "st2mqtt-global-version");
    assert_eq!(config["state_topic"], "st2mqtt/sensor/st2mqtt-global-version/state");
    assert_eq!(config["entity_category"], "diagnostic");
    assert_eq!(config["availability_topic"], "st2mqtt/availability");
    assert!(config.get("unit_of_measurement").is_none());
}
