use crate::hass_mqtt::base::{Device, EntityConfig, Origin};
use crate::hass_mqtt::enumerator::select_kinds_for_device;
use crate::hass_mqtt::filter_alarm::FilterAlarmThreshold;
use crate::hass_mqtt::instance::{publish_entity_config, EntityInstance};
use crate::hass_mqtt::motion_saver::MotionSensorSaver;
use crate::service::device::Device as ServiceDevice;
use crate::service::hass::{
    availability_topic, select_command_topic, select_state_topic, topic_safe_id, HassClient,
};
use crate::service::state::StateHandle;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use strum_macros::{Display, EnumString};

#[derive(Serialize, Clone, Debug)]
pub struct SelectConfig {
    #[serde(flatten)]
    pub base: EntityConfig,

    pub command_topic: String,
    pub options: Vec<String>,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
}

impl SelectConfig {
    pub fn for_device(
        device: &ServiceDevice,
        kind: SelectKind,
        name: &str,
        options: Vec<String>,
        unit_of_measurement: Option<String>,
    ) -> Self {
        Self {
            base: EntityConfig {
                availability_topic: availability_topic(),
                name: Some(format!("{} {name}", device.name())),
                device_class: None,
                origin: Origin::default(),
                device: Device::for_device(device),
                unique_id: format!("{id}_{kind}", id = topic_safe_id(device)),
                entity_category: Some("config".to_string()),
                icon: None,
            },
            command_topic: select_command_topic(device, kind),
            options,
            state_topic: select_state_topic(device, kind),
            unit_of_measurement,
        }
    }

    pub async fn publish(&self, state: &StateHandle, client: &HassClient) -> anyhow::Result<()> {
        publish_entity_config("select", state, client, &self.base, self).await
    }

    pub async fn notify_state(&self, client: &HassClient, option: &str) -> anyhow::Result<()> {
        client.publish(&self.state_topic, option).await
    }
}

/// The selects that we know how to map onto SmartThings devices.
/// The string form is used in topics and in the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SelectKind {
    FilterAlarmThreshold,
    MotionSensorSaver,
}

/// A select entity bound to a specific device
#[async_trait]
pub trait SelectEntity: EntityInstance {
    fn kind(&self) -> SelectKind;

    /// The full entity name, including the device label
    fn name(&self) -> String;

    async fn options(&self) -> anyhow::Result<Vec<String>>;
    async fn current_option(&self) -> anyhow::Result<Option<String>>;

    async fn unit_of_measurement(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn select_option(&self, option: &str) -> anyhow::Result<()>;
}

/// Construct the select of the requested kind for a device.
/// Only the kinds that discovery offers for the device are accepted.
pub fn select_for_device(
    device: &ServiceDevice,
    state: &StateHandle,
    kind: SelectKind,
) -> anyhow::Result<Box<dyn SelectEntity>> {
    if !select_kinds_for_device(device).contains(&kind) {
        anyhow::bail!("{device} does not offer {kind}");
    }
    match kind {
        SelectKind::FilterAlarmThreshold => Ok(Box::new(
            FilterAlarmThreshold::new(device, state)
                .ok_or_else(|| anyhow::anyhow!("{device} has no filter alarm thresholds"))?,
        )),
        SelectKind::MotionSensorSaver => Ok(Box::new(MotionSensorSaver::new(device, state))),
    }
}

/// Render an attribute value the way it is presented as an option
pub fn option_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.to_string(),
        other => other.to_string(),
    }
}
