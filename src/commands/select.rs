use crate::hass_mqtt::select::{select_for_device, SelectKind};
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
pub struct SelectCommand {
    /// The id, label or name of the device
    #[arg(long)]
    pub id: String,

    /// Which select to operate on, eg: filter_alarm_threshold
    kind: SelectKind,

    /// The option to select. If omitted, the available options
    /// and the current option are printed
    option: Option<String>,
}

impl SelectCommand {
    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let client = args.api_args.api_client()?;
        let state = Arc::new(crate::service::state::State::new());
        state.set_api_client(Arc::new(client.clone())).await;

        let info = match client.get_device_by_id(&self.id).await {
            Ok(info) => info,
            Err(err) => {
                log::debug!("{} is not a device id ({err:#}), searching by name", self.id);
                client
                    .get_devices()
                    .await?
                    .into_iter()
                    .find(|info| {
                        info.name.eq_ignore_ascii_case(&self.id)
                            || info
                                .label
                                .as_deref()
                                .map(|label| label.eq_ignore_ascii_case(&self.id))
                                .unwrap_or(false)
                    })
                    .ok_or_else(|| anyhow::anyhow!("device '{}' not found", self.id))?
            }
        };
        let id = info.device_id.clone();
        state.device_mut(&id).await.set_device_info(info);
        state.refresh_device_status(&id).await?;

        let device = state.resolve_device_read_only(&id).await?;
        let select = select_for_device(&device, &state, self.kind)?;

        match &self.option {
            None => {
                let current = select.current_option().await?;
                let unit = select.unit_of_measurement().await?;
                println!("{}", select.name());
                for option in select.options().await? {
                    let marker = if current.as_deref() == Some(option.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    match &unit {
                        Some(unit) => println!("{marker} {option} {unit}"),
                        None => println!("{marker} {option}"),
                    }
                }
            }
            Some(option) => {
                select.select_option(option).await?;
                println!(
                    "{}: {}",
                    select.name(),
                    select.current_option().await?.unwrap_or_default()
                );
            }
        }

        Ok(())
    }
}
