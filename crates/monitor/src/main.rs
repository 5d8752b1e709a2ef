//! Vehicle Monitor - Main Entry Point

use monitor::{init_logging, run, MonitorConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(MonitorConfig::default_path);
    let config = MonitorConfig::load(&path)?;
    init_logging(&config.log_level)?;

    info!("=== Vehicle Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Adapter on {} @ {} baud, sensor on {} @ {} baud",
        config.adapter.device, config.adapter.baud_rate, config.sensor.device, config.sensor.baud_rate
    );

    run(config).await
}
