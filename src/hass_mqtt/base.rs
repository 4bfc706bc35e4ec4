use crate::service::device::Device as ServiceDevice;
use crate::service::hass::topic_safe_id;
use crate::version_info::st2mqtt_version;
use serde::Serialize;

const MODEL: &str = "st2mqtt";

#[derive(Serialize, Clone, Debug, Default)]
pub struct EntityConfig {
    pub availability_topic: String,
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    pub origin: Origin,
    pub device: Device,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct Origin {
    pub name: &'static str,
    pub sw_version: &'static str,
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            name: MODEL,
            sw_version: st2mqtt_version(),
        }
    }
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct Device {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_device: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
}

impl Device {
    pub fn for_device(device: &ServiceDevice) -> Self {
        let manufacturer = device
            .info
            .as_ref()
            .and_then(|info| info.manufacturer_name.clone())
            .or_else(|| device.ocf_manufacturer().map(|m| m.to_string()))
            .unwrap_or_else(|| "SmartThings".to_string());
        let model = device
            .ocf_model()
            .or_else(|| device.device_type())
            .unwrap_or("Unknown")
            .to_string();

        Self {
            name: device.name(),
            manufacturer,
            model,
            sw_version: None,
            via_device: Some(MODEL.to_string()),
            identifiers: vec![format!("{MODEL}-{}", topic_safe_id(device))],
        }
    }

    pub fn this_service() -> Self {
        Self {
            name: "SmartThings to MQTT".to_string(),
            manufacturer: "st2mqtt".to_string(),
            model: MODEL.to_string(),
            sw_version: Some(st2mqtt_version().to_string()),
            via_device: None,
            identifiers: vec![MODEL.to_string()],
        }
    }
}
