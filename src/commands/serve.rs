use anyhow::Result;
use colored::Colorize;
use pii_telemetry::{config, server};
use std::path::Path;

/// Execute the serve command
///
/// Loads the configuration and runs the server until a shutdown signal
/// arrives and every exporter has drained.
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting pii-telemetry...".green());

    let cfg = config::load_config_from(config_path)?;
    server::start_server(cfg).await?;

    Ok(())
}
