use crate::hass_mqtt::enumerator::{may_offer_selects, select_kinds_for_device};
use crate::service::hass::spawn_hass_integration;
use crate::service::http::run_http_server;
use crate::service::state::StateHandle;
use crate::version_info::st2mqtt_version;
use anyhow::Context;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[derive(clap::Parser, Debug)]
pub struct ServeCommand {
    /// The port on which the HTTP API will listen
    #[arg(long, default_value_t = 8056)]
    http_port: u16,

    /// How often, in seconds, to refresh device status from SmartThings
    #[arg(long, default_value_t = 120)]
    poll_interval: u64,
}

/// Refresh every device that could offer a select, including those
/// whose initial status fetch failed, and re-register with hass when
/// the set of selects offered by a device changes
async fn poll_devices(state: &StateHandle) {
    let mut registration_changed = false;

    for d in state.devices().await {
        if !may_offer_selects(&d) {
            continue;
        }
        let before = select_kinds_for_device(&d);
        if let Err(err) = state.refresh_device_status(&d.id).await {
            log::error!("while polling {d}: {err:#}");
            continue;
        }

        let after = state
            .device_by_id(&d.id)
            .await
            .map(|d| select_kinds_for_device(&d))
            .unwrap_or_default();
        if after != before {
            log::info!("{d} now offers {after:?}");
            registration_changed = true;
        } else if let Err(err) = state.notify_of_state_change(&d.id).await {
            log::error!("while reporting state of {d}: {err:#}");
        }
    }

    if registration_changed {
        if let Some(client) = state.get_hass_client().await {
            if let Err(err) = client.register_with_hass(state).await {
                log::error!("while re-registering with hass: {err:#}");
            }
        }
    }
}

async fn periodic_state_poll(state: StateHandle, interval: Duration) {
    loop {
        sleep(interval).await;
        poll_devices(&state).await;
    }
}

impl ServeCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        log::info!("Starting service. version {}", st2mqtt_version());
        let state = Arc::new(crate::service::state::State::new());

        let client = args.api_args.api_client()?;
        state.set_api_client(Arc::new(client.clone())).await;

        log::info!("Querying SmartThings for device list");
        for info in client.get_devices().await? {
            let id = info.device_id.clone();
            state.device_mut(&id).await.set_device_info(info);
            if let Err(err) = state.refresh_device_status(&id).await {
                log::warn!("Failed to fetch status of {id}: {err:#}");
            }
        }

        log::info!("Devices returned from SmartThings");
        for device in state.devices().await {
            log::info!("{device}");
            log::info!(
                "  type={} climate={}",
                device.device_type().unwrap_or("?"),
                device.is_climate()
            );
            if let (Some(mnmn), Some(mnmo)) = (device.ocf_manufacturer(), device.ocf_model()) {
                log::info!("  OCF: {mnmn} {mnmo}");
            }
            let kinds = select_kinds_for_device(&device);
            if kinds.is_empty() {
                log::info!("  No selects apply to this device");
            } else {
                let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
                log::info!("  selects: {}", kinds.join(", "));
            }
            log::trace!("{:#?}", device.status);

            log::info!("");
        }

        // Start periodic status polling
        {
            let state = state.clone();
            let interval = Duration::from_secs(self.poll_interval.max(1));
            tokio::spawn(periodic_state_poll(state, interval));
        }

        // start advertising on local mqtt
        let mqtt = spawn_hass_integration(state.clone(), &args.hass_args).await?;

        tokio::select! {
            res = run_http_server(state.clone(), self.http_port) => res,
            res = mqtt => res.context("mqtt task")?.context("hass integration stopped"),
        }
    }
}
