use crate::hass_mqtt::enumerator::select_kinds_for_device;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
pub struct ListCommand {
    /// Only list devices that offer at least one select
    #[arg(long)]
    selects_only: bool,
}

impl ListCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let state = Arc::new(crate::service::state::State::new());
        let client = args.api_args.api_client()?;
        state.set_api_client(Arc::new(client.clone())).await;

        for info in client.get_devices().await? {
            let id = info.device_id.clone();
            state.device_mut(&id).await.set_device_info(info);
            if let Err(err) = state.refresh_device_status(&id).await {
                log::warn!("Failed to fetch status of {id}: {err:#}");
            }
        }

        for d in state.devices().await {
            let kinds: Vec<String> = select_kinds_for_device(&d)
                .iter()
                .map(|k| k.to_string())
                .collect();
            if self.selects_only && kinds.is_empty() {
                continue;
            }
            println!(
                "{id} {kind:<8} {name} {selects}",
                id = d.id,
                kind = d.device_type().unwrap_or(""),
                name = d.name(),
                selects = if kinds.is_empty() {
                    String::new()
                } else {
                    format!("[{}]", kinds.join(", "))
                },
            );
        }

        Ok(())
    }
}
