use crate::hass_mqtt::instance::EntityInstance;
use crate::hass_mqtt::select::{option_string, SelectConfig, SelectEntity, SelectKind};
use crate::service::device::Device as ServiceDevice;
use crate::service::hass::HassClient;
use crate::service::state::StateHandle;
use crate::smartthings_api::{DUST_FILTER_ALARM, MAIN_COMPONENT};
use anyhow::Context;
use async_trait::async_trait;

const NAME: &str = "Filter Alarm Threshold";
const THRESHOLD: &str = "alarmThreshold";
const SUPPORTED_THRESHOLDS: &str = "supportedAlarmThresholds";

/// The thresholds the device advertises, in the order advertised
pub fn threshold_options(device: &ServiceDevice) -> Option<Vec<String>> {
    let supported = device
        .attribute_value(DUST_FILTER_ALARM, SUPPORTED_THRESHOLDS)?
        .as_array()?;
    Some(supported.iter().map(option_string).collect())
}

pub fn current_threshold(device: &ServiceDevice) -> Option<String> {
    device
        .attribute_value(DUST_FILTER_ALARM, THRESHOLD)
        .map(option_string)
}

pub fn threshold_unit(device: &ServiceDevice) -> Option<String> {
    device
        .attribute_unit(DUST_FILTER_ALARM, THRESHOLD)
        .map(|unit| unit.to_string())
}

/// Selects the number of hours of use after which the
/// dust filter alarm is raised
pub struct FilterAlarmThreshold {
    select: SelectConfig,
    device_id: String,
    state: StateHandle,
}

impl FilterAlarmThreshold {
    /// Returns None if the device doesn't report its supported thresholds
    pub fn new(device: &ServiceDevice, state: &StateHandle) -> Option<Self> {
        let options = threshold_options(device)?;
        Some(Self {
            select: SelectConfig::for_device(
                device,
                SelectKind::FilterAlarmThreshold,
                NAME,
                options,
                threshold_unit(device),
            ),
            device_id: device.id.to_string(),
            state: state.clone(),
        })
    }

    async fn device(&self) -> anyhow::Result<ServiceDevice> {
        self.state
            .device_by_id(&self.device_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("device '{}' not found", self.device_id))
    }
}

#[async_trait]
impl SelectEntity for FilterAlarmThreshold {
    fn kind(&self) -> SelectKind {
        SelectKind::FilterAlarmThreshold
    }

    fn name(&self) -> String {
        self.select.base.name.clone().unwrap_or_default()
    }

    async fn options(&self) -> anyhow::Result<Vec<String>> {
        Ok(threshold_options(&self.device().await?).unwrap_or_default())
    }

    async fn current_option(&self) -> anyhow::Result<Option<String>> {
        Ok(current_threshold(&self.device().await?))
    }

    async fn unit_of_measurement(&self) -> anyhow::Result<Option<String>> {
        Ok(threshold_unit(&self.device().await?))
    }

    async fn select_option(&self, option: &str) -> anyhow::Result<()> {
        let threshold: i64 = option
            .trim()
            .parse()
            .with_context(|| format!("'{option}' is not a valid alarm threshold"))?;

        let client = self.state.api_client().await?;
        let accepted = client
            .command(
                &self.device_id,
                MAIN_COMPONENT,
                DUST_FILTER_ALARM,
                "setAlarmThreshold",
                vec![threshold.into()],
            )
            .await
            .with_context(|| format!("setAlarmThreshold {threshold} on {}", self.device_id))?;
        if !accepted {
            anyhow::bail!(
                "SmartThings did not accept setAlarmThreshold {threshold} for {}",
                self.device_id
            );
        }

        // Reflect the change right away; the next status refresh
        // from SmartThings will confirm it
        self.state
            .device_mut(&self.device_id)
            .await
            .set_optimistic_value(DUST_FILTER_ALARM, THRESHOLD, threshold.into());

        Ok(())
    }
}

#[async_trait]
impl EntityInstance for FilterAlarmThreshold {
    async fn publish_config(&self, state: &StateHandle, client: &HassClient) -> anyhow::Result<()> {
        self.select.publish(state, client).await
    }

    async fn notify_state(&self, client: &HassClient) -> anyhow::Result<()> {
        match self.current_option().await? {
            Some(option) => self.select.notify_state(client, &option).await,
            None => {
                log::trace!(
                    "FilterAlarmThreshold::notify_state: no {THRESHOLD} for {}",
                    self.device_id
                );
                Ok(())
            }
        }
    }
}
