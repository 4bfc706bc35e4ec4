use crate::opt_env_var;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

// This file implements the subset of the SmartThings REST API described at
// <https://developer.smartthings.com/docs/api/public>
// that we need: listing devices, reading device status and sending
// device commands.

const SERVER: &str = "https://api.smartthings.com/v1";

fn endpoint(url: &str) -> String {
    format!("{SERVER}{url}")
}

pub const MAIN_COMPONENT: &str = "main";

pub const DUST_FILTER_ALARM: &str = "samsungce.dustFilterAlarm";
pub const EXECUTE: &str = "execute";
pub const OCF: &str = "ocf";

#[derive(clap::Parser, Debug)]
pub struct SmartThingsApiArguments {
    /// The SmartThings personal access token. If not passed here, it will
    /// be read from the ST2MQTT_TOKEN environment variable.
    #[arg(long, global = true)]
    pub api_token: Option<String>,
}

impl SmartThingsApiArguments {
    pub fn opt_api_token(&self) -> anyhow::Result<Option<String>> {
        match &self.api_token {
            Some(token) => Ok(Some(token.to_string())),
            None => opt_env_var("ST2MQTT_TOKEN"),
        }
    }

    pub fn api_token(&self) -> anyhow::Result<String> {
        self.opt_api_token()?.ok_or_else(|| {
            anyhow::anyhow!(
                "Please specify the SmartThings token either via the \
                --api-token parameter or by setting $ST2MQTT_TOKEN"
            )
        })
    }

    pub fn api_client(&self) -> anyhow::Result<SmartThingsClient> {
        let token = self.api_token()?;
        Ok(SmartThingsClient::new(token))
    }
}

/// The remote operations that the select entities rely upon.
/// `SmartThingsClient` is the production implementation.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Returns the status of the main component of the device
    async fn get_device_status(&self, device_id: &str) -> anyhow::Result<ComponentStatus>;

    /// Sends a single capability command to the device.
    /// Returns true if the cloud accepted it.
    async fn command(
        &self,
        device_id: &str,
        component: &str,
        capability: &str,
        command: &str,
        arguments: Vec<JsonValue>,
    ) -> anyhow::Result<bool>;

    /// Invokes the OCF `execute` capability against `href`.
    /// Without a payload this is a read; the result is delivered
    /// later via the `execute.data` attribute.
    async fn execute(
        &self,
        device_id: &str,
        href: &str,
        payload: Option<JsonValue>,
    ) -> anyhow::Result<bool> {
        let mut arguments = vec![JsonValue::String(href.to_string())];
        if let Some(payload) = payload {
            arguments.push(payload);
        }
        self.command(device_id, MAIN_COMPONENT, EXECUTE, "execute", arguments)
            .await
    }
}

#[derive(Clone)]
pub struct SmartThingsClient {
    token: String,
}

impl SmartThingsClient {
    pub fn new<K: Into<String>>(token: K) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub async fn get_devices(&self) -> anyhow::Result<Vec<DeviceInfo>> {
        collect_device_pages(endpoint("/devices"), |url| async move {
            self.get_request_with_json_response::<_, GetDevicesResponse>(url)
                .await
        })
        .await
        .context("get_devices")
    }

    pub async fn get_device_by_id<I: AsRef<str>>(&self, id: I) -> anyhow::Result<DeviceInfo> {
        let id = id.as_ref();
        self.get_request_with_json_response(endpoint(&format!("/devices/{id}")))
            .await
            .with_context(|| format!("get_device_by_id {id}"))
    }

    pub async fn send_commands(
        &self,
        device_id: &str,
        commands: Vec<DeviceCommand>,
    ) -> anyhow::Result<Vec<CommandResult>> {
        let url = endpoint(&format!("/devices/{device_id}/commands"));
        let request = ExecuteCommandsRequest { commands };

        let resp: ExecuteCommandsResponse = self
            .request_with_json_response(Method::POST, url, &request)
            .await?;

        Ok(resp.results)
    }
}

#[async_trait]
impl DeviceControl for SmartThingsClient {
    async fn get_device_status(&self, device_id: &str) -> anyhow::Result<ComponentStatus> {
        let url = endpoint(&format!("/devices/{device_id}/status"));
        let mut resp: DeviceStatusResponse = self.get_request_with_json_response(url).await?;
        resp.components
            .remove(MAIN_COMPONENT)
            .ok_or_else(|| anyhow::anyhow!("device {device_id} has no {MAIN_COMPONENT} status"))
    }

    async fn command(
        &self,
        device_id: &str,
        component: &str,
        capability: &str,
        command: &str,
        arguments: Vec<JsonValue>,
    ) -> anyhow::Result<bool> {
        let command = DeviceCommand {
            component: component.to_string(),
            capability: capability.to_string(),
            command: command.to_string(),
            arguments,
        };
        log::debug!("{device_id}: {command:?}");
        let results = self
            .send_commands(device_id, vec![command])
            .await
            .with_context(|| format!("send command to {device_id}"))?;
        Ok(commands_accepted(&results))
    }
}

/// Fetches `first_url` and then each page named by `_links.next`,
/// concatenating the devices in page order
async fn collect_device_pages<F, Fut>(
    first_url: String,
    mut fetch: F,
) -> anyhow::Result<Vec<DeviceInfo>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = anyhow::Result<GetDevicesResponse>>,
{
    let mut devices = vec![];
    let mut visited = HashSet::new();
    let mut next_url = Some(first_url);

    while let Some(url) = next_url.take() {
        if !visited.insert(url.clone()) {
            anyhow::bail!("device list links back to {url}");
        }
        let resp = fetch(url.clone()).await.with_context(|| format!("fetching {url}"))?;
        devices.extend(resp.items);
        next_url = resp.links.and_then(|links| links.next).map(|link| link.href);
    }

    Ok(devices)
}

fn commands_accepted(results: &[CommandResult]) -> bool {
    !results.is_empty()
        && results
            .iter()
            .all(|r| r.status == "ACCEPTED" || r.status == "COMPLETED")
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub component: String,
    pub capability: String,
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<JsonValue>,
}

#[derive(Serialize, Debug)]
struct ExecuteCommandsRequest {
    pub commands: Vec<DeviceCommand>,
}

#[derive(Deserialize, Debug)]
struct ExecuteCommandsResponse {
    #[serde(default)]
    pub results: Vec<CommandResult>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CommandResult {
    pub status: String,
}

#[derive(Deserialize, Debug)]
pub struct GetDevicesResponse {
    pub items: Vec<DeviceInfo>,
    #[serde(rename = "_links", default)]
    pub links: Option<Links>,
}

#[derive(Deserialize, Debug)]
pub struct Links {
    #[serde(default)]
    pub next: Option<Link>,
}

#[derive(Deserialize, Debug)]
pub struct Link {
    pub href: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub manufacturer_name: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub components: Vec<DeviceComponent>,
}

impl DeviceInfo {
    pub fn main_component(&self) -> Option<&DeviceComponent> {
        self.components.iter().find(|c| c.id == MAIN_COMPONENT)
    }

    /// The capability ids advertised by the main component
    pub fn capability_ids(&self) -> Vec<String> {
        self.main_component()
            .map(|c| c.capabilities.iter().map(|cap| cap.id.to_string()).collect())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceComponent {
    pub id: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityReference>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CapabilityReference {
    pub id: String,
}

#[derive(Deserialize, Debug)]
pub struct DeviceStatusResponse {
    pub components: HashMap<String, ComponentStatus>,
}

/// capability -> attribute -> state, for a single component
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct ComponentStatus {
    pub capabilities: HashMap<String, HashMap<String, AttributeState>>,
}

impl ComponentStatus {
    pub fn attribute(&self, capability: &str, attribute: &str) -> Option<&AttributeState> {
        self.capabilities.get(capability)?.get(attribute)
    }

    /// Returns the attribute value, treating an explicit null the
    /// same as an absent attribute
    pub fn attribute_value(&self, capability: &str, attribute: &str) -> Option<&JsonValue> {
        self.attribute(capability, attribute)
            .map(|attr| &attr.value)
            .filter(|value| !value.is_null())
    }

    pub fn set_attribute_value(
        &mut self,
        capability: &str,
        attribute: &str,
        value: JsonValue,
        timestamp: DateTime<Utc>,
    ) {
        let attr = self
            .capabilities
            .entry(capability.to_string())
            .or_default()
            .entry(attribute.to_string())
            .or_default();
        attr.value = value;
        attr.timestamp.replace(timestamp);
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct AttributeState {
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

pub fn from_json<T: serde::de::DeserializeOwned, S: AsRef<[u8]>>(text: S) -> anyhow::Result<T> {
    let text = text.as_ref();
    serde_json_path_to_error::from_slice(text)
        .map_err(|err| anyhow::anyhow!("{err}. Input: {}", String::from_utf8_lossy(text)))
}

pub async fn json_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> anyhow::Result<T> {
    let url = response.url().clone();
    let data = response
        .bytes()
        .await
        .with_context(|| format!("read {url} response body"))?;
    from_json(&data).with_context(|| format!("parsing {url} response"))
}

pub async fn http_response_body<R: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> anyhow::Result<R> {
    let url = response.url().clone();

    let status = response.status();
    if !status.is_success() {
        let body_bytes = response.bytes().await.with_context(|| {
            format!(
                "request {url} status {}: {}, and failed to read response body",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
        })?;

        anyhow::bail!(
            "request {url} status {}: {}. Response body: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            String::from_utf8_lossy(&body_bytes)
        );
    }
    json_body(response).await.with_context(|| {
        format!(
            "request {url} status {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
    })
}

impl SmartThingsClient {
    async fn get_request_with_json_response<T: reqwest::IntoUrl, R: serde::de::DeserializeOwned>(
        &self,
        url: T,
    ) -> anyhow::Result<R> {
        let response = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?
            .request(Method::GET, url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        http_response_body(response).await
    }

    async fn request_with_json_response<
        T: reqwest::IntoUrl,
        B: serde::Serialize,
        R: serde::de::DeserializeOwned,
    >(
        &self,
        method: Method,
        url: T,
        body: &B,
    ) -> anyhow::Result<R> {
        let response = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?
            .request(method, url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        http_response_body(response).await
    }
}
