use crate::hass_mqtt::filter_alarm::FilterAlarmThreshold;
use crate::hass_mqtt::instance::EntityList;
use crate::hass_mqtt::motion_saver::MotionSensorSaver;
use crate::hass_mqtt::select::SelectKind;
use crate::hass_mqtt::sensor::GlobalFixedDiagnostic;
use crate::service::device::Device as ServiceDevice;
use crate::service::state::StateHandle;
use crate::smartthings_api::{DUST_FILTER_ALARM, EXECUTE};
use crate::version_info::st2mqtt_version;
use anyhow::Context;

pub async fn enumerate_all_entites(state: &StateHandle) -> anyhow::Result<EntityList> {
    let mut entities = EntityList::new();

    entities.add(GlobalFixedDiagnostic::new("Version", st2mqtt_version()));

    let devices = state.devices().await;

    for d in &devices {
        enumerate_entities_for_device(d, state, &mut entities)
            .await
            .with_context(|| format!("enumerate_entities_for_device({d})"))?;
    }

    Ok(entities)
}

/// Returns the kinds of select that can be offered for the device,
/// based on its capabilities and reported status
pub fn select_kinds_for_device(d: &ServiceDevice) -> Vec<SelectKind> {
    let mut kinds = vec![];

    if d.has_capability(DUST_FILTER_ALARM)
        && d.attribute_value(DUST_FILTER_ALARM, "supportedAlarmThresholds")
            .is_some()
    {
        kinds.push(SelectKind::FilterAlarmThreshold);
    }

    if MotionSensorSaver::is_supported(d) {
        kinds.push(SelectKind::MotionSensorSaver);
    }

    kinds
}

/// Whether the capabilities of the device could yield a select
/// once its status is known. Unlike select_kinds_for_device this
/// doesn't depend on the status, so it holds for devices whose
/// status has not been fetched yet.
pub fn may_offer_selects(d: &ServiceDevice) -> bool {
    d.has_capability(DUST_FILTER_ALARM) || (d.is_climate() && d.has_capability(EXECUTE))
}

pub async fn enumerate_entities_for_device(
    d: &ServiceDevice,
    state: &StateHandle,
    entities: &mut EntityList,
) -> anyhow::Result<()> {
    let kinds = select_kinds_for_device(d);
    if kinds.is_empty() {
        log::trace!("enumerate_entities_for_device: nothing to offer for {d}");
        return Ok(());
    }

    for kind in kinds {
        match kind {
            SelectKind::FilterAlarmThreshold => match FilterAlarmThreshold::new(d, state) {
                Some(select) => entities.add(select),
                None => {
                    log::debug!("{d}: supportedAlarmThresholds is not a list, skipping {kind}");
                }
            },
            SelectKind::MotionSensorSaver => {
                entities.add(MotionSensorSaver::new(d, state));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::state::State;
    use crate::smartthings_api::{from_json, ComponentStatus, DeviceStatusResponse, GetDevicesResponse};
    use std::sync::Arc;

    const LIST_DEVICES_EXAMPLE: &str = include_str!("../../test-data/list_devices.json");
    const DEVICE_STATUS_EXAMPLE: &str = include_str!("../../test-data/device_status.json");

    fn example_status() -> ComponentStatus {
        let status: DeviceStatusResponse = from_json(DEVICE_STATUS_EXAMPLE).unwrap();
        status.components.get("main").cloned().unwrap()
    }

    async fn example_state() -> StateHandle {
        let state = Arc::new(State::new());
        let resp: GetDevicesResponse = from_json(LIST_DEVICES_EXAMPLE).unwrap();
        for info in resp.items {
            let mut device = state.device_mut(&info.device_id).await;
            device.set_device_info(info);
        }
        state
    }

    #[tokio::test]
    async fn selects_follow_capabilities() {
        let state = example_state().await;
        let devices = state.devices().await;
        let by_name = |name: &str| {
            devices
                .iter()
                .find(|d| d.name() == name)
                .cloned()
                .unwrap()
        };

        // Without any status, nothing can be offered yet
        assert!(select_kinds_for_device(&by_name("Living Room AC")).is_empty());

        let mut ac = by_name("Living Room AC");
        ac.set_status(example_status());
        assert_eq!(
            select_kinds_for_device(&ac),
            vec![SelectKind::FilterAlarmThreshold, SelectKind::MotionSensorSaver]
        );

        // The purifier has no execute capability and isn't a climate device
        let mut purifier = by_name("Bedroom Purifier");
        purifier.set_status(example_status());
        assert_eq!(
            select_kinds_for_device(&purifier),
            vec![SelectKind::FilterAlarmThreshold]
        );

        let mut lamp = by_name("Hallway Lamp");
        lamp.set_status(example_status());
        assert!(select_kinds_for_device(&lamp).is_empty());
    }

    #[tokio::test]
    async fn capabilities_alone_decide_polling() {
        let state = example_state().await;
        let names: Vec<String> = state
            .devices()
            .await
            .iter()
            .filter(|d| may_offer_selects(d))
            .map(|d| d.name())
            .collect();
        assert_eq!(names, vec!["Bedroom Purifier", "Living Room AC"]);
    }

    #[tokio::test]
    async fn enumerate_counts() {
        let state = example_state().await;
        let devices = state.devices().await;
        for d in &devices {
            state.device_mut(&d.id).await.set_status(example_status());
        }

        let entities = enumerate_all_entites(&state).await.unwrap();
        // Version + AC (2 selects) + purifier (1 select)
        assert_eq!(entities.len(), 4);
    }
}
