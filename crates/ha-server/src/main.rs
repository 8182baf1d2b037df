//! Hub server
//!
//! Loads the configuration directory, sets up the Xiaozhi bridge and runs
//! until interrupted.
//!
//! ```text
//! xiaozhi-hub --config /config --log-level debug
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ha_components::xiaozhi::{self, XiaozhiConfig};
use ha_components::HomeAssistant;
use ha_core::CoreState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xiaozhi-hub", version, about = "Report hub entities to the Xiaozhi backend")]
struct Cli {
    /// Configuration directory holding configuration.yaml and .storage/
    #[arg(short, long, default_value = ".")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!("Starting hub in {:?}", cli.config);

    let root = ha_config::load_configuration(&cli.config).context("loading configuration")?;
    let xiaozhi_config: XiaozhiConfig = ha_config::component_config(&root, xiaozhi::DOMAIN)
        .context("reading the xiaozhi section")?;

    let hass = Arc::new(HomeAssistant::new(&cli.config));
    hass.set_state(CoreState::Starting);
    hass.registries
        .load_all()
        .await
        .context("loading registries")?;
    hass.auth.load().await.context("loading users")?;

    if hass.auth.get_owner().await.is_none() {
        let owner = hass.auth.create_user("Owner", true).await?;
        info!("Created owner user {}", owner.id);
    }

    let hub = xiaozhi::setup(hass.clone(), xiaozhi_config);
    hass.start();
    info!("Hub is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    hub.stop();
    hass.begin_stop();
    hass.set_state(CoreState::FinalWrite);
    hass.registries
        .save_all()
        .await
        .context("saving registries")?;
    hass.auth.save().await.context("saving users")?;
    hass.set_state(CoreState::Stopped);

    Ok(())
}
