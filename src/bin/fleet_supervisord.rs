use std::sync::Arc;

use anyhow::{Context, Result};
use fleet_core::application::Fleet;
use fleet_core::infrastructure::{init_tracing_with_level, ConfigManager, HttpMarketApi, ShutdownManager};
use fleet_supervisor::bin_common::{load_config_from_env, ConfigType};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = load_config_from_env(ConfigType::Base);

    let config = ConfigManager::load(&config_path)
        .with_context(|| format!("failed to load fleet config from {}", config_path.display()))?;
    let base = config.snapshot().base.clone();

    // The log directory itself comes from config, so logging can only start
    // once the config has loaded; startup failures above land on stderr.
    let out_dir = base.out_dir.clone();
    let log_dir = out_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let _log_guard = init_tracing_with_level(&base.log_level, log_dir.to_str().unwrap_or("out/logs"));

    info!("========================================");
    info!("Starting fleet-supervisord");
    info!("Press Ctrl+C to stop");
    info!("========================================");

    base.resolve_key_file().with_context(|| {
        format!(
            "no Ethereum key file found under {}; fleet-supervisord cannot start without an identity",
            base.ethereum.key_dir.display()
        )
    })?;

    let market = Arc::new(HttpMarketApi::new(base.node_address.clone()));
    let config = Arc::new(config);
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.spawn_signal_handler();

    let fleet = Fleet::new(market, Arc::clone(&config), Arc::clone(&shutdown), out_dir);
    fleet.run().await.context("fleet supervisor loop failed")?;

    info!("========================================");
    info!("fleet-supervisord stopped gracefully");
    info!("========================================");

    Ok(())
}
