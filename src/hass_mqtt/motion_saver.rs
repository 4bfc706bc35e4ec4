use crate::hass_mqtt::instance::EntityInstance;
use crate::hass_mqtt::select::{SelectConfig, SelectEntity, SelectKind};
use crate::service::device::Device as ServiceDevice;
use crate::service::hass::HassClient;
use crate::service::state::StateHandle;
use crate::smartthings_api::EXECUTE;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};

const NAME: &str = "Motion Sensor Saver";
const SAMSUNG: &str = "Samsung Electronics";
const MODE_HREF: &str = "mode/vs/0";
const OPTIONS_KEY: &str = "x.com.samsung.da.options";

/// Air conditioner models known to accept the motion
/// sensor modes via `mode/vs/0`
const SUPPORTED_MODELS: &[&str] = &["ARTIK051_PRAC_20K"];

/// The code form of each mode is what the device reports and
/// accepts via the `execute` capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr)]
pub enum MotionSensorSaverMode {
    #[strum(serialize = "MotionMode_PowerSave")]
    PowerSave,
    #[strum(serialize = "MotionMode_Default")]
    Default,
    #[strum(serialize = "MotionMode_Cooling")]
    Cooling,
    #[strum(serialize = "MotionMode_PowerSaveOff")]
    PowerSaveOff,
    #[strum(serialize = "MotionMode_DefaultOff")]
    DefaultOff,
    #[strum(serialize = "MotionMode_CoolingOff")]
    CoolingOff,
}

static MODE_BY_LABEL: Lazy<HashMap<&'static str, MotionSensorSaverMode>> = Lazy::new(|| {
    MotionSensorSaverMode::iter()
        .map(|mode| (mode.label(), mode))
        .collect()
});

impl MotionSensorSaverMode {
    pub fn code(self) -> &'static str {
        self.into()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::PowerSave => "Eco (Keeping Cool)",
            Self::Default => "Normal (Keeping Cool)",
            Self::Cooling => "Comfort (Keeping Cool)",
            Self::PowerSaveOff => "Eco (Off)",
            Self::DefaultOff => "Normal (Off)",
            Self::CoolingOff => "Comfort (Off)",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        code.parse().ok()
    }

    pub fn from_label(label: &str) -> Option<Self> {
        MODE_BY_LABEL.get(label).copied()
    }

    pub fn labels() -> Vec<String> {
        Self::iter().map(|mode| mode.label().to_string()).collect()
    }
}

/// Extract the motion sensor mode from the value of the
/// `execute.data` attribute. The device reports a list of all
/// of its active options; the first mode, in table order, that
/// appears in that list is the current one.
pub fn parse_mode(data: &JsonValue) -> Option<MotionSensorSaverMode> {
    let options = data
        .get("payload")
        .and_then(|payload| payload.get(OPTIONS_KEY))
        .or_else(|| data.get(OPTIONS_KEY))?
        .as_array()?;

    MotionSensorSaverMode::iter().find(|mode| {
        options
            .iter()
            .any(|opt| opt.as_str() == Some(mode.code()))
    })
}

/// Selects the behavior of a Samsung air conditioner when
/// its motion sensor sees no one in the room
pub struct MotionSensorSaver {
    select: SelectConfig,
    device_id: String,
    state: StateHandle,
}

impl MotionSensorSaver {
    pub fn is_supported(device: &ServiceDevice) -> bool {
        device.is_climate()
            && device.has_capability(EXECUTE)
            && device.device_type() == Some("OCF")
            && device.ocf_manufacturer() == Some(SAMSUNG)
            && device
                .ocf_model()
                .map(|model| SUPPORTED_MODELS.contains(&model))
                .unwrap_or(false)
    }

    pub fn new(device: &ServiceDevice, state: &StateHandle) -> Self {
        Self {
            select: SelectConfig::for_device(
                device,
                SelectKind::MotionSensorSaver,
                NAME,
                MotionSensorSaverMode::labels(),
                None,
            ),
            device_id: device.id.to_string(),
            state: state.clone(),
        }
    }

    /// Ask the device to publish its current mode, and pick up
    /// whatever SmartThings now reports for it
    async fn request_mode(&self) -> anyhow::Result<()> {
        let client = self.state.api_client().await?;
        client.execute(&self.device_id, MODE_HREF, None).await?;
        self.state.refresh_device_status(&self.device_id).await
    }
}

#[async_trait]
impl SelectEntity for MotionSensorSaver {
    fn kind(&self) -> SelectKind {
        SelectKind::MotionSensorSaver
    }

    fn name(&self) -> String {
        self.select.base.name.clone().unwrap_or_default()
    }

    async fn options(&self) -> anyhow::Result<Vec<String>> {
        Ok(MotionSensorSaverMode::labels())
    }

    async fn current_option(&self) -> anyhow::Result<Option<String>> {
        if let Err(err) = self.request_mode().await {
            log::warn!(
                "MotionSensorSaver: reading {MODE_HREF} from {}: {err:#}",
                self.device_id
            );
        }

        let mut device = self.state.device_mut(&self.device_id).await;
        let reported = device.attribute_value(EXECUTE, "data").and_then(parse_mode);
        match reported {
            Some(mode) => {
                device.motion_sensor_saver_mode.replace(mode);
            }
            None => {
                log::warn!(
                    "MotionSensorSaver: {} reported no motion sensor mode, \
                     using last known mode {:?}",
                    self.device_id,
                    device.motion_sensor_saver_mode
                );
            }
        }

        Ok(device
            .motion_sensor_saver_mode
            .map(|mode| mode.label().to_string()))
    }

    async fn select_option(&self, option: &str) -> anyhow::Result<()> {
        let mode = MotionSensorSaverMode::from_label(option)
            .ok_or_else(|| anyhow::anyhow!("'{option}' is not a motion sensor saver mode"))?;

        let client = self.state.api_client().await?;
        let payload = json!({ "x.com.samsung.da.options": [mode.code()] });
        let accepted = client
            .execute(&self.device_id, MODE_HREF, Some(payload.clone()))
            .await?;

        if !accepted {
            anyhow::bail!(
                "SmartThings did not accept {} for {}",
                mode.code(),
                self.device_id
            );
        }

        let mut device = self.state.device_mut(&self.device_id).await;
        device.set_optimistic_value(EXECUTE, "data", json!({ "payload": payload }));
        device.motion_sensor_saver_mode.replace(mode);

        Ok(())
    }
}

#[async_trait]
impl EntityInstance for MotionSensorSaver {
    async fn publish_config(&self, state: &StateHandle, client: &HassClient) -> anyhow::Result<()> {
        self.select.publish(state, client).await
    }

    async fn notify_state(&self, client: &HassClient) -> anyhow::Result<()> {
        match self.current_option().await? {
            Some(option) => self.select.notify_state(client, &option).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::state::State;
    use crate::smartthings_api::mock::MockControl;
    use crate::smartthings_api::{from_json, ComponentStatus, DeviceInfo, OCF};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    const AC_ID: &str = "6f2a8c1e-3d4b-4a7e-9c0f-1b2d3e4f5a60";

    fn ac_info(extra_caps: &[&str]) -> DeviceInfo {
        let mut caps = vec![
            "ocf",
            "switch",
            "airConditionerMode",
            "airConditionerFanMode",
            "temperatureMeasurement",
            "thermostatCoolingSetpoint",
        ];
        caps.extend_from_slice(extra_caps);
        let caps: Vec<_> = caps.iter().map(|id| json!({"id": id})).collect();
        serde_json::from_value(json!({
            "deviceId": AC_ID,
            "label": "Living Room AC",
            "type": "OCF",
            "components": [{"id": "main", "capabilities": caps}],
        }))
        .unwrap()
    }

    fn ac_status(model: &str, options: JsonValue) -> ComponentStatus {
        let reported = Utc::now() - Duration::minutes(5);
        let mut status = ComponentStatus::default();
        status.set_attribute_value(OCF, "mnmn", json!(SAMSUNG), reported);
        status.set_attribute_value(OCF, "mnmo", json!(model), reported);
        status.set_attribute_value(
            EXECUTE,
            "data",
            json!({"payload": {"x.com.samsung.da.options": options}}),
            reported,
        );
        status
    }

    fn ac_device(model: &str, extra_caps: &[&str]) -> ServiceDevice {
        let mut device = ServiceDevice::new(AC_ID);
        device.set_device_info(ac_info(extra_caps));
        device.set_status(ac_status(model, json!([])));
        device
    }

    #[test]
    fn catalog_is_bijective() {
        let modes: Vec<_> = MotionSensorSaverMode::iter().collect();
        assert_eq!(modes.len(), 6);
        for mode in modes {
            assert_eq!(MotionSensorSaverMode::from_label(mode.label()), Some(mode));
            assert_eq!(MotionSensorSaverMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(MODE_BY_LABEL.len(), 6);
        assert_eq!(
            MotionSensorSaverMode::from_code("MotionMode_PowerSave"),
            Some(MotionSensorSaverMode::PowerSave)
        );
        assert_eq!(MotionSensorSaverMode::from_label("Turbo"), None);
    }

    #[test]
    fn labels_in_table_order() {
        assert_eq!(
            MotionSensorSaverMode::labels(),
            vec![
                "Eco (Keeping Cool)",
                "Normal (Keeping Cool)",
                "Comfort (Keeping Cool)",
                "Eco (Off)",
                "Normal (Off)",
                "Comfort (Off)",
            ]
        );
    }

    #[test]
    fn parse_reported_payload() {
        let data: JsonValue = from_json(
            r#"{"payload": {
                "rt": ["x.com.samsung.da.mode"],
                "x.com.samsung.da.options": ["Comfort", "MotionMode_CoolingOff", "Light_On"]
            }}"#,
        )
        .unwrap();
        assert_eq!(parse_mode(&data), Some(MotionSensorSaverMode::CoolingOff));

        // Only whole option strings count
        let data = json!({"payload": {"x.com.samsung.da.options": ["NotMotionMode_Default"]}});
        assert_eq!(parse_mode(&data), None);

        // Mentions of a mode elsewhere in the payload are ignored
        let data = json!({"payload": {"x.com.samsung.da.description": "MotionMode_Default"}});
        assert_eq!(parse_mode(&data), None);

        let data = json!({"x.com.samsung.da.options": ["MotionMode_Default"]});
        assert_eq!(parse_mode(&data), Some(MotionSensorSaverMode::Default));

        assert_eq!(parse_mode(&JsonValue::Null), None);
    }

    #[test]
    fn supported_devices() {
        assert!(MotionSensorSaver::is_supported(&ac_device(
            "ARTIK051_PRAC_20K|10256941|6001",
            &["execute"]
        )));
        // Wrong model
        assert!(!MotionSensorSaver::is_supported(&ac_device(
            "ARTIK051_KRAC_18K|10256941|6001",
            &["execute"]
        )));
        // No way to send the mode
        assert!(!MotionSensorSaver::is_supported(&ac_device(
            "ARTIK051_PRAC_20K|10256941|6001",
            &[]
        )));
        // Not Samsung
        let mut device = ac_device("ARTIK051_PRAC_20K", &["execute"]);
        let mut status = device.status.clone();
        status.set_attribute_value(OCF, "mnmn", json!("Acme"), Utc::now());
        device.set_status(status);
        assert!(!MotionSensorSaver::is_supported(&device));
        // Not a climate device
        let mut device = ServiceDevice::new(AC_ID);
        device.set_device_info(
            serde_json::from_value(json!({
                "deviceId": AC_ID,
                "type": "OCF",
                "components": [{"id": "main", "capabilities": [{"id": "execute"}]}],
            }))
            .unwrap(),
        );
        device.set_status(ac_status("ARTIK051_PRAC_20K", json!([])));
        assert!(!MotionSensorSaver::is_supported(&device));
    }

    async fn state_with_ac(control: Arc<MockControl>) -> StateHandle {
        let state = Arc::new(State::new());
        *state.device_mut(AC_ID).await = ac_device("ARTIK051_PRAC_20K|1|2", &["execute"]);
        state.set_api_client(control).await;
        state
    }

    #[tokio::test]
    async fn current_option_reads_device() {
        let control = Arc::new(MockControl::with_status(ac_status(
            "ARTIK051_PRAC_20K|1|2",
            json!(["Comfort", "MotionMode_Cooling"]),
        )));
        let state = state_with_ac(control.clone()).await;
        let device = state.device_by_id(AC_ID).await.unwrap();
        let select = MotionSensorSaver::new(&device, &state);

        assert_eq!(select.name(), "Living Room AC Motion Sensor Saver");
        assert_eq!(
            select.current_option().await.unwrap().as_deref(),
            Some("Comfort (Keeping Cool)")
        );

        let sent = control.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.capability, EXECUTE);
        assert_eq!(sent[0].1.arguments, vec![json!(MODE_HREF)]);
    }

    #[tokio::test]
    async fn current_option_falls_back_to_last_known() {
        let control = Arc::new(MockControl::with_status(ac_status(
            "ARTIK051_PRAC_20K|1|2",
            json!(["MotionMode_PowerSaveOff"]),
        )));
        let state = state_with_ac(control.clone()).await;
        let device = state.device_by_id(AC_ID).await.unwrap();
        let select = MotionSensorSaver::new(&device, &state);

        assert_eq!(
            select.current_option().await.unwrap().as_deref(),
            Some("Eco (Off)")
        );

        // The device now reports something we can't interpret
        *control.status.lock().unwrap() = ac_status("ARTIK051_PRAC_20K|1|2", json!(["Comfort"]));
        assert_eq!(
            select.current_option().await.unwrap().as_deref(),
            Some("Eco (Off)")
        );
    }

    #[tokio::test]
    async fn current_option_unknown_without_history() {
        let control = Arc::new(MockControl::with_status(ac_status(
            "ARTIK051_PRAC_20K|1|2",
            json!(["Comfort"]),
        )));
        let state = state_with_ac(control).await;
        let device = state.device_by_id(AC_ID).await.unwrap();
        let select = MotionSensorSaver::new(&device, &state);

        assert_eq!(select.current_option().await.unwrap(), None);
    }

    #[tokio::test]
    async fn select_is_optimistic() {
        let control = Arc::new(MockControl::with_status(ac_status(
            "ARTIK051_PRAC_20K|1|2",
            json!(["MotionMode_PowerSave"]),
        )));
        let state = state_with_ac(control.clone()).await;
        let device = state.device_by_id(AC_ID).await.unwrap();
        let select = MotionSensorSaver::new(&device, &state);

        select.select_option("Comfort (Off)").await.unwrap();

        let sent = control.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].1.arguments,
            vec![
                json!(MODE_HREF),
                json!({"x.com.samsung.da.options": ["MotionMode_CoolingOff"]})
            ]
        );

        // SmartThings still reports the previous mode, but that
        // report predates our change
        assert_eq!(
            select.current_option().await.unwrap().as_deref(),
            Some("Comfort (Off)")
        );
    }

    #[tokio::test]
    async fn unknown_label_is_rejected() {
        let control = Arc::new(MockControl::accepting());
        let state = state_with_ac(control.clone()).await;
        let device = state.device_by_id(AC_ID).await.unwrap();
        let select = MotionSensorSaver::new(&device, &state);

        assert!(select.select_option("MotionMode_PowerSave").await.is_err());
        assert!(control.sent().is_empty());
    }

    #[tokio::test]
    async fn rejected_execute_leaves_state_alone() {
        let control = Arc::new(MockControl::default());
        let state = state_with_ac(control).await;
        let device = state.device_by_id(AC_ID).await.unwrap();
        let select = MotionSensorSaver::new(&device, &state);

        assert!(select.select_option("Eco (Off)").await.is_err());
        let device = state.device_by_id(AC_ID).await.unwrap();
        assert!(!device.has_pending_updates());
        assert_eq!(device.motion_sensor_saver_mode, None);
    }
}
