use crate::hass_mqtt::enumerator::enumerate_entities_for_device;
use crate::hass_mqtt::instance::EntityList;
use crate::service::device::Device;
use crate::service::hass::{topic_safe_id, HassClient};
use crate::smartthings_api::DeviceControl;
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

#[derive(Default)]
pub struct State {
    devices_by_id: Mutex<HashMap<String, Device>>,
    api_client: Mutex<Option<Arc<dyn DeviceControl>>>,
    hass_client: Mutex<Option<HassClient>>,
    hass_discovery_prefix: Mutex<String>,
}

pub type StateHandle = Arc<State>;

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_hass_disco_prefix(&self, prefix: String) {
        *self.hass_discovery_prefix.lock().await = prefix;
    }

    pub async fn get_hass_disco_prefix(&self) -> String {
        self.hass_discovery_prefix.lock().await.to_string()
    }

    /// Returns a mutable version of the specified device, creating
    /// an entry for it if necessary.
    pub async fn device_mut(&self, id: &str) -> MappedMutexGuard<'_, Device> {
        let devices = self.devices_by_id.lock().await;
        MutexGuard::map(devices, |devices| {
            devices
                .entry(id.to_string())
                .or_insert_with(|| Device::new(id))
        })
    }

    pub async fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices_by_id.lock().await.values().cloned().collect();
        devices.sort_by_key(|d| d.name());
        devices
    }

    /// Returns an immutable copy of the specified Device
    pub async fn device_by_id(&self, id: &str) -> Option<Device> {
        let devices = self.devices_by_id.lock().await;
        devices.get(id).cloned()
    }

    pub async fn resolve_device_read_only(&self, label: &str) -> anyhow::Result<Device> {
        self.resolve_device(label)
            .await
            .ok_or_else(|| anyhow::anyhow!("device '{label}' not found"))
    }

    /// Resolve a device using its id, label or name, ignoring case.
    pub async fn resolve_device(&self, label: &str) -> Option<Device> {
        let devices = self.devices_by_id.lock().await;

        // Try by id first
        if let Some(device) = devices.get(label) {
            return Some(device.clone());
        }

        for d in devices.values() {
            if d.name().eq_ignore_ascii_case(label)
                || d.id.eq_ignore_ascii_case(label)
                || topic_safe_id(d).eq_ignore_ascii_case(label)
                || d.info
                    .as_ref()
                    .map(|info| info.name.eq_ignore_ascii_case(label))
                    .unwrap_or(false)
            {
                return Some(d.clone());
            }
        }

        None
    }

    pub async fn set_api_client(&self, client: Arc<dyn DeviceControl>) {
        self.api_client.lock().await.replace(client);
    }

    pub async fn get_api_client(&self) -> Option<Arc<dyn DeviceControl>> {
        self.api_client.lock().await.clone()
    }

    pub async fn api_client(&self) -> anyhow::Result<Arc<dyn DeviceControl>> {
        self.get_api_client()
            .await
            .ok_or_else(|| anyhow::anyhow!("SmartThings API client is not available"))
    }

    pub async fn set_hass_client(&self, client: HassClient) {
        self.hass_client.lock().await.replace(client);
    }

    pub async fn get_hass_client(&self) -> Option<HassClient> {
        self.hass_client.lock().await.clone()
    }

    /// Fetch the current status of the device from SmartThings
    /// and merge it into our copy of the device
    pub async fn refresh_device_status(&self, device_id: &str) -> anyhow::Result<()> {
        let client = self.api_client().await?;
        let status = client
            .get_device_status(device_id)
            .await
            .with_context(|| format!("get_device_status {device_id}"))?;
        self.device_mut(device_id).await.set_status(status);
        Ok(())
    }

    /// Re-publish the state of the entities for the device to hass
    pub async fn notify_of_state_change(self: &Arc<Self>, device_id: &str) -> anyhow::Result<()> {
        let Some(client) = self.get_hass_client().await else {
            return Ok(());
        };

        let device = self
            .device_by_id(device_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("device '{device_id}' not found"))?;

        let mut entities = EntityList::new();
        enumerate_entities_for_device(&device, self, &mut entities).await?;
        entities
            .notify_state(&client)
            .await
            .with_context(|| format!("notify_of_state_change for {device}"))
    }
}
