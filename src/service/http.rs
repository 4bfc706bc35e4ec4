use crate::hass_mqtt::enumerator::select_kinds_for_device;
use crate::hass_mqtt::select::{select_for_device, SelectKind};
use crate::service::device::Device;
use crate::service::state::StateHandle;
use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

fn response_with_code<T: ToString + std::fmt::Display>(code: StatusCode, err: T) -> Response {
    if !code.is_success() {
        log::error!("err: {err:#}");
    }

    let mut response = Json(serde_json::json!({
        "code": code.as_u16(),
        "msg": format!("{err:#}")
    }))
    .into_response();
    *response.status_mut() = code;
    response
}

fn generic<T: ToString + std::fmt::Display>(err: T) -> Response {
    response_with_code(StatusCode::INTERNAL_SERVER_ERROR, err)
}

fn not_found<T: ToString + std::fmt::Display>(err: T) -> Response {
    response_with_code(StatusCode::NOT_FOUND, err)
}

fn bad_request<T: ToString + std::fmt::Display>(err: T) -> Response {
    response_with_code(StatusCode::BAD_REQUEST, err)
}

async fn resolve_device_read_only(state: &StateHandle, id: &str) -> Result<Device, Response> {
    state.resolve_device_read_only(id).await.map_err(not_found)
}

fn parse_kind(kind: &str) -> Result<SelectKind, Response> {
    kind.parse()
        .map_err(|_| bad_request(format!("'{kind}' is not a select kind")))
}

/// Returns a json array of device information
async fn list_devices(State(state): State<StateHandle>) -> Result<Response, Response> {
    #[derive(Serialize)]
    struct DeviceItem {
        pub id: String,
        pub name: String,
        pub device_type: Option<String>,
        pub selects: Vec<SelectKind>,
    }

    let devices: Vec<_> = state
        .devices()
        .await
        .into_iter()
        .map(|d| DeviceItem {
            name: d.name(),
            device_type: d.device_type().map(|t| t.to_string()),
            selects: select_kinds_for_device(&d),
            id: d.id,
        })
        .collect();

    Ok(Json(devices).into_response())
}

#[derive(Serialize)]
struct SelectItem {
    kind: SelectKind,
    name: String,
    options: Vec<String>,
    current_option: Option<String>,
    unit_of_measurement: Option<String>,
}

/// Returns the selects offered for a given device, with their
/// options and current state
async fn device_list_selects(
    State(state): State<StateHandle>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let device = resolve_device_read_only(&state, &id).await?;

    let mut items = vec![];
    for kind in select_kinds_for_device(&device) {
        let select = select_for_device(&device, &state, kind).map_err(generic)?;
        items.push(SelectItem {
            kind,
            name: select.name(),
            options: select.options().await.map_err(generic)?,
            current_option: select.current_option().await.map_err(generic)?,
            unit_of_measurement: select.unit_of_measurement().await.map_err(generic)?,
        });
    }

    Ok(Json(items).into_response())
}

/// Selects an option for a given device
async fn device_select_option(
    State(state): State<StateHandle>,
    Path((id, kind, option)): Path<(String, String, String)>,
) -> Result<Response, Response> {
    let device = resolve_device_read_only(&state, &id).await?;
    let kind = parse_kind(&kind)?;

    let select = select_for_device(&device, &state, kind).map_err(not_found)?;
    let options = select.options().await.map_err(generic)?;
    if !options.contains(&option) {
        return Err(bad_request(format!(
            "'{option}' is not one of {options:?} for {kind}"
        )));
    }

    select
        .select_option(&option)
        .await
        .with_context(|| format!("{kind} {option} for {device}"))
        .map_err(generic)?;

    if let Err(err) = state.notify_of_state_change(&device.id).await {
        log::warn!("notify_of_state_change for {device}: {err:#}");
    }

    Ok(response_with_code(StatusCode::OK, "ok"))
}

fn build_router(state: StateHandle) -> Router {
    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/device/{id}/selects", get(device_list_selects))
        .route(
            "/api/device/{id}/select/{kind}/{option}",
            get(device_select_option),
        )
        .with_state(state)
}

pub async fn run_http_server(state: StateHandle, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("run_http_server: binding to port {port}"))?;
    let addr = listener.local_addr()?;
    log::info!("http server addr is {addr:?}");
    if let Err(err) = axum::serve(listener, app).await {
        log::error!("http server stopped: {err:#}");
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::state::State as ServiceState;
    use crate::smartthings_api::mock::MockControl;
    use crate::smartthings_api::{ComponentStatus, DeviceInfo, DUST_FILTER_ALARM};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_build_router() {
        // axum has a history of changing the URL syntax across
        // semver bumps, and the syntax is only checked at runtime.
        // This next line will panic if axum decides that
        // the syntax is bad.
        let _ = build_router(StateHandle::default());
    }

    async fn purifier_state(control: Arc<MockControl>) -> StateHandle {
        let state = Arc::new(ServiceState::new());
        let info: DeviceInfo = serde_json::from_value(json!({
            "deviceId": "purifier-1",
            "label": "Bedroom Purifier",
            "components": [{"id": "main", "capabilities": [{"id": DUST_FILTER_ALARM}]}],
        }))
        .unwrap();

        let reported = Utc::now() - Duration::minutes(5);
        let mut status = ComponentStatus::default();
        status.set_attribute_value(
            DUST_FILTER_ALARM,
            "supportedAlarmThresholds",
            json!([180, 300, 500]),
            reported,
        );
        status.set_attribute_value(DUST_FILTER_ALARM, "alarmThreshold", json!(300), reported);

        {
            let mut device = state.device_mut("purifier-1").await;
            device.set_device_info(info);
            device.set_status(status);
        }
        state.set_api_client(control).await;
        state
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let state = purifier_state(Arc::new(MockControl::accepting())).await;
        let err = device_list_selects(State(state), Path("kitchen".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn select_validates_option() {
        let control = Arc::new(MockControl::accepting());
        let state = purifier_state(control.clone()).await;

        let err = device_select_option(
            State(state.clone()),
            Path((
                "bedroom purifier".to_string(),
                "filter_alarm_threshold".to_string(),
                "42".to_string(),
            )),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = device_select_option(
            State(state.clone()),
            Path((
                "purifier-1".to_string(),
                "volume".to_string(),
                "500".to_string(),
            )),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(control.sent().is_empty());

        // Not offered for this device
        let err = device_select_option(
            State(state.clone()),
            Path((
                "purifier-1".to_string(),
                "motion_sensor_saver".to_string(),
                "Eco (Off)".to_string(),
            )),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let resp = device_select_option(
            State(state.clone()),
            Path((
                "purifier-1".to_string(),
                "filter_alarm_threshold".to_string(),
                "500".to_string(),
            )),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(control.sent().len(), 1);

        let device = state.device_by_id("purifier-1").await.unwrap();
        assert_eq!(
            device.attribute_value(DUST_FILTER_ALARM, "alarmThreshold"),
            Some(&json!(500))
        );
    }
}
