use crate::service::hass::HassArguments;
use crate::smartthings_api::SmartThingsApiArguments;
use crate::version_info::st2mqtt_version;
use clap::Parser;
use std::str::FromStr;

mod commands;
mod hass_mqtt;
mod service;
mod smartthings_api;
mod version_info;

#[derive(clap::Parser, Debug)]
#[command(version = st2mqtt_version(), propagate_version = true)]
pub struct Args {
    #[command(flatten)]
    api_args: SmartThingsApiArguments,
    #[command(flatten)]
    hass_args: HassArguments,

    #[command(subcommand)]
    cmd: SubCommand,
}

#[derive(clap::Parser, Debug)]
pub enum SubCommand {
    /// List SmartThings devices and the selects they offer
    List(commands::list::ListCommand),
    /// Show or change a select on a device
    Select(commands::select::SelectCommand),
    /// Run the Home Assistant bridge
    Serve(commands::serve::ServeCommand),
}

/// Reads an environment variable, returning None if it is not set,
/// or an error if it is set but cannot be parsed as a T
pub fn opt_env_var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    <T as FromStr>::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(p) => Ok(Some(
            p.parse()
                .map_err(|err| anyhow::anyhow!("parsing ${name}: {err:#}"))?,
        )),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => anyhow::bail!("${name} is invalid: {err:#}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    color_backtrace::install();
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match &args.cmd {
        SubCommand::List(cmd) => cmd.run(&args).await,
        SubCommand::Select(cmd) => cmd.run(&args).await,
        SubCommand::Serve(cmd) => cmd.run(&args).await,
    }
}
