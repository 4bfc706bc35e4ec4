use crate::hass_mqtt::enumerator::enumerate_all_entites;
use crate::hass_mqtt::select::{select_for_device, SelectKind};
use crate::opt_env_var;
use crate::service::device::Device as ServiceDevice;
use crate::service::state::StateHandle;
use anyhow::Context;
use async_channel::Receiver;
use mosquitto_rs::router::{MqttRouter, Params, Payload, State};
use mosquitto_rs::{Client, Event, QoS};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(clap::Parser, Debug)]
pub struct HassArguments {
    /// The mqtt broker hostname or address.
    /// Falls back to $ST2MQTT_MQTT_HOST.
    #[arg(long, global = true)]
    mqtt_host: Option<String>,

    /// The mqtt broker port, 1883 unless specified.
    /// Falls back to $ST2MQTT_MQTT_PORT.
    #[arg(long, global = true)]
    mqtt_port: Option<u16>,

    /// Broker username. Falls back to $ST2MQTT_MQTT_USER.
    #[arg(long, global = true)]
    mqtt_username: Option<String>,

    /// Broker password. Falls back to $ST2MQTT_MQTT_PASSWORD.
    #[arg(long, global = true)]
    mqtt_password: Option<String>,

    /// The topic prefix that Home Assistant watches for discovery
    #[arg(long, global = true, default_value = "homeassistant")]
    hass_discovery_prefix: String,
}

/// Connection parameters for the broker, after applying environment
/// fallbacks and defaults
#[derive(Debug, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
}

fn arg_or_env<T: Clone + FromStr>(arg: &Option<T>, var: &str) -> anyhow::Result<Option<T>>
where
    <T as FromStr>::Err: std::fmt::Display,
{
    match arg {
        Some(v) => Ok(Some(v.clone())),
        None => opt_env_var(var),
    }
}

impl MqttSettings {
    fn new(
        host: Option<String>,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
    ) -> anyhow::Result<Self> {
        let host = host.ok_or_else(|| {
            anyhow::anyhow!(
                "Please specify the mqtt broker either via the \
                --mqtt-host parameter or by setting $ST2MQTT_MQTT_HOST"
            )
        })?;
        let credentials = match (username, password) {
            (Some(u), Some(p)) => Some((u, p)),
            (None, None) => None,
            _ => anyhow::bail!(
                "MQTT username and password either both need to be set, or both need to be unset"
            ),
        };
        Ok(Self {
            host,
            port: port.unwrap_or(1883),
            credentials,
        })
    }
}

impl HassArguments {
    pub fn mqtt_settings(&self) -> anyhow::Result<MqttSettings> {
        MqttSettings::new(
            arg_or_env(&self.mqtt_host, "ST2MQTT_MQTT_HOST")?,
            arg_or_env(&self.mqtt_port, "ST2MQTT_MQTT_PORT")?,
            arg_or_env(&self.mqtt_username, "ST2MQTT_MQTT_USER")?,
            arg_or_env(&self.mqtt_password, "ST2MQTT_MQTT_PASSWORD")?,
        )
    }
}

#[derive(Clone)]
pub struct HassClient {
    client: Client,
}

impl HassClient {
    pub async fn register_with_hass(&self, state: &StateHandle) -> anyhow::Result<()> {
        let entities = enumerate_all_entites(state).await?;

        log::trace!("register_with_hass: register {} entities", entities.len());
        entities.publish_config(state, self).await?;

        // Mark as available
        log::trace!("register_with_hass: mark as online");
        self.publish(availability_topic(), "online")
            .await
            .context("online -> availability_topic")?;

        // report initial state
        log::trace!("register_with_hass: reporting state");
        entities.notify_state(self).await.context("notify_state")?;

        log::trace!("register_with_hass: done");

        Ok(())
    }

    pub async fn publish<T: AsRef<str> + std::fmt::Display, P: AsRef<[u8]> + std::fmt::Display>(
        &self,
        topic: T,
        payload: P,
    ) -> anyhow::Result<()> {
        log::trace!("{topic} -> {payload}");
        self.client
            .publish(topic, payload, QoS::AtMostOnce, false)
            .await?;
        Ok(())
    }

    pub async fn publish_obj<T: AsRef<str> + std::fmt::Display, P: Serialize>(
        &self,
        topic: T,
        payload: P,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&payload)?;
        log::trace!("{topic} -> {payload}");
        self.client
            .publish(topic, payload, QoS::AtMostOnce, false)
            .await?;
        Ok(())
    }
}

pub fn topic_safe_string(s: &str) -> String {
    let mut result = String::new();
    for c in s.chars() {
        if c == ':' || c == ' ' {
            result.push('_');
        } else {
            result.push(c.to_ascii_lowercase());
        }
    }
    result
}

/// SmartThings ids are UUIDs, which are already topic safe,
/// but we don't want to trust that with MQTT wildcards
pub fn topic_safe_id(device: &ServiceDevice) -> String {
    let mut id = device.id.to_string();
    id.retain(|c| !matches!(c, ':' | '/' | '+' | '#'));
    id
}

pub fn select_command_topic(device: &ServiceDevice, kind: SelectKind) -> String {
    format!(
        "st2mqtt/select/{id}/{kind}/command",
        id = topic_safe_id(device)
    )
}

pub fn select_state_topic(device: &ServiceDevice, kind: SelectKind) -> String {
    format!(
        "st2mqtt/select/{id}/{kind}/state",
        id = topic_safe_id(device)
    )
}

/// All entities use the same topic so that we can mark unavailable
/// via last-will
pub fn availability_topic() -> String {
    "st2mqtt/availability".to_string()
}

#[derive(Deserialize)]
struct IdAndKind {
    id: String,
    kind: String,
}

async fn mqtt_select_command(
    Payload(option): Payload<String>,
    Params(IdAndKind { id, kind }): Params<IdAndKind>,
    State(state): State<StateHandle>,
) -> anyhow::Result<()> {
    log::info!("{kind} for {id}: {option}");
    let device = state
        .resolve_device(&id)
        .await
        .ok_or_else(|| anyhow::anyhow!("device '{id}' not found"))?;
    let kind: SelectKind = kind
        .parse()
        .with_context(|| format!("'{kind}' is not a select kind"))?;

    let select = select_for_device(&device, &state, kind)?;
    select
        .select_option(&option)
        .await
        .with_context(|| format!("{kind} {option} for {device}"))?;

    state.notify_of_state_change(&device.id).await
}

/// HASS is advising us that its status has changed
async fn mqtt_homeassitant_status(
    Payload(status): Payload<String>,
    State(state): State<StateHandle>,
) -> anyhow::Result<()> {
    log::info!("Home Assistant status changed: {status}");

    let client = state
        .get_hass_client()
        .await
        .ok_or_else(|| anyhow::anyhow!("hass client is not available"))?;

    client.register_with_hass(&state).await?;

    Ok(())
}

async fn subscribe_routes(
    client: &Client,
    state: &StateHandle,
) -> anyhow::Result<Arc<MqttRouter<StateHandle>>> {
    let disco_prefix = state.get_hass_disco_prefix().await;
    let mut router: MqttRouter<StateHandle> = MqttRouter::new(client.clone());

    router
        .route(format!("{disco_prefix}/status"), mqtt_homeassitant_status)
        .await?;
    router
        .route("st2mqtt/select/:id/:kind/command", mqtt_select_command)
        .await?;

    Ok(Arc::new(router))
}

/// Dispatches incoming messages until the broker connection goes away
/// for good. Subscriptions and discovery are redone after a reconnect,
/// since the broker may have forgotten both.
async fn run_mqtt_loop(
    state: StateHandle,
    subscriber: Receiver<Event>,
    client: HassClient,
) -> anyhow::Result<()> {
    let mut router = subscribe_routes(&client.client, &state).await?;
    client
        .register_with_hass(&state)
        .await
        .context("register_with_hass")?;
    let mut reconnecting = false;

    while let Ok(event) = subscriber.recv().await {
        match event {
            Event::Message(msg) => {
                let router = router.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = router.dispatch(msg.clone(), state).await {
                        log::error!("While dispatching {msg:?}: {err:#}");
                    }
                });
            }
            Event::Disconnected(reason) => {
                log::warn!("MQTT disconnected with reason={reason}");
                reconnecting = true;
            }
            Event::Connected(status) => {
                log::info!("MQTT connected with status={status}");
                if std::mem::take(&mut reconnecting) {
                    router = subscribe_routes(&client.client, &state).await?;
                    client
                        .register_with_hass(&state)
                        .await
                        .context("register_with_hass after reconnect")?;
                }
            }
        }
    }

    anyhow::bail!("mqtt event stream ended")
}

/// Connects to the broker and starts handling Home Assistant traffic.
/// The returned task only finishes if the integration stops working.
pub async fn spawn_hass_integration(
    state: StateHandle,
    args: &HassArguments,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let settings = args.mqtt_settings()?;
    let client = Client::with_auto_id()?;

    client.set_last_will(availability_topic(), "offline", QoS::AtMostOnce, true)?;
    if let Some((username, password)) = &settings.credentials {
        client.set_username_and_password(Some(username.as_str()), Some(password.as_str()))?;
    }
    client
        .connect(&settings.host, settings.port.into(), Duration::from_secs(120), None)
        .await
        .with_context(|| format!("connecting to mqtt broker {}:{}", settings.host, settings.port))?;
    let subscriber = client
        .subscriber()
        .ok_or_else(|| anyhow::anyhow!("mqtt subscriber was already taken"))?;

    let client = HassClient { client };
    state.set_hass_client(client.clone()).await;
    state
        .set_hass_disco_prefix(args.hass_discovery_prefix.clone())
        .await;

    Ok(tokio::spawn(run_mqtt_loop(state, subscriber, client)))
}
