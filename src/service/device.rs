use crate::hass_mqtt::motion_saver::MotionSensorSaverMode;
use crate::smartthings_api::{ComponentStatus, DeviceInfo, OCF};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

const THERMOSTAT_CAPABILITIES: &[&str] = &[
    "temperatureMeasurement",
    "thermostatHeatingSetpoint",
    "thermostatMode",
];

/// How long a locally written value may disagree with what
/// SmartThings reports before we stop showing it
fn optimistic_ttl() -> Duration {
    Duration::minutes(5)
}

const AIR_CONDITIONER_CAPABILITIES: &[&str] = &[
    "airConditionerMode",
    "airConditionerFanMode",
    "switch",
    "temperatureMeasurement",
    "thermostatCoolingSetpoint",
];

#[derive(Default, Clone, Debug)]
pub struct Device {
    pub id: String,

    /// Metadata from the SmartThings device list
    pub info: Option<DeviceInfo>,

    /// Status of the main component as last reported by SmartThings
    pub status: ComponentStatus,
    pub last_polled: Option<DateTime<Utc>>,

    /// Values we wrote as part of a successful command, which
    /// take precedence over `status` until SmartThings reports
    /// something that confirms or supersedes them.
    optimistic: HashMap<(String, String), OptimisticValue>,

    /// The most recently observed motion sensor saver mode
    pub motion_sensor_saver_mode: Option<MotionSensorSaverMode>,
}

#[derive(Clone, Debug)]
struct OptimisticValue {
    value: JsonValue,
    written: DateTime<Utc>,
}

impl std::fmt::Display for Device {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{} ({})", self.name(), self.id)
    }
}

impl Device {
    /// Create a new device given just its id.
    /// No other facts are known or reflected by it at this time;
    /// they will need to be added by the caller.
    pub fn new<I: Into<String>>(id: I) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Returns the label assigned in the SmartThings app, falling
    /// back to the device name, and then to the id.
    pub fn name(&self) -> String {
        match &self.info {
            Some(info) => match &info.label {
                Some(label) if !label.is_empty() => label.to_string(),
                _ if !info.name.is_empty() => info.name.to_string(),
                _ => self.id.to_string(),
            },
            None => self.id.to_string(),
        }
    }

    pub fn set_device_info(&mut self, info: DeviceInfo) {
        self.info.replace(info);
    }

    pub fn device_type(&self) -> Option<&str> {
        self.info.as_ref()?.device_type.as_deref()
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.info
            .as_ref()
            .map(|info| info.capability_ids())
            .unwrap_or_default()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|cap| cap == capability)
    }

    /// Whether this device would be treated as a thermostat or
    /// air conditioner
    pub fn is_climate(&self) -> bool {
        let caps = self.capabilities();
        let has = |wanted: &str| caps.iter().any(|cap| cap == wanted);

        has("thermostat")
            || THERMOSTAT_CAPABILITIES.iter().all(|&cap| has(cap))
            || AIR_CONDITIONER_CAPABILITIES.iter().all(|&cap| has(cap))
    }

    /// The OCF manufacturer name, eg: "Samsung Electronics"
    pub fn ocf_manufacturer(&self) -> Option<&str> {
        self.attribute_value(OCF, "mnmn")?.as_str()
    }

    /// The OCF model number up to the first `|`, eg: "ARTIK051_PRAC_20K"
    pub fn ocf_model(&self) -> Option<&str> {
        let model = self.attribute_value(OCF, "mnmo")?.as_str()?;
        model.split('|').next()
    }

    /// Returns the effective value of an attribute; a pending
    /// optimistic value wins over the reported status.
    pub fn attribute_value(&self, capability: &str, attribute: &str) -> Option<&JsonValue> {
        if let Some(pending) = self
            .optimistic
            .get(&(capability.to_string(), attribute.to_string()))
        {
            return Some(&pending.value);
        }
        self.status.attribute_value(capability, attribute)
    }

    pub fn attribute_unit(&self, capability: &str, attribute: &str) -> Option<&str> {
        self.status.attribute(capability, attribute)?.unit.as_deref()
    }

    /// Record a value that we expect SmartThings to report soon
    pub fn set_optimistic_value(&mut self, capability: &str, attribute: &str, value: JsonValue) {
        let now = Utc::now();
        self.status
            .set_attribute_value(capability, attribute, value.clone(), now);
        self.optimistic.insert(
            (capability.to_string(), attribute.to_string()),
            OptimisticValue {
                value,
                written: now,
            },
        );
    }

    /// Replace the reported status. Optimistic values are dropped
    /// when the new status agrees with them, reports the attribute
    /// as having changed after we wrote it, or still disagrees once
    /// the device has had a few minutes to apply our change.
    pub fn set_status(&mut self, status: ComponentStatus) {
        self.set_status_at(status, Utc::now());
    }

    fn set_status_at(&mut self, status: ComponentStatus, now: DateTime<Utc>) {
        let id = &self.id;
        self.optimistic.retain(|(capability, attribute), pending| {
            let Some(reported) = status.attribute(capability, attribute) else {
                return now - pending.written <= optimistic_ttl();
            };
            if reported.value == pending.value {
                return false;
            }
            if reported.timestamp.map(|ts| ts > pending.written) == Some(true) {
                return false;
            }
            if now - pending.written > optimistic_ttl() {
                log::warn!(
                    "{id}: {capability}.{attribute} is still reported as {} \
                     after we set it to {}; reverting to the reported value",
                    reported.value,
                    pending.value
                );
                return false;
            }
            true
        });
        self.status = status;
        self.last_polled.replace(now);
    }

    #[cfg(test)]
    pub fn has_pending_updates(&self) -> bool {
        !self.optimistic.is_empty()
    }
}
