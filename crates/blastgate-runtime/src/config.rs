//! Config file loading for the binary.

use std::path::Path;

use anyhow::Context;
use blastgate_core::config::ShopConfig;

/// Load the shop configuration. `None` means "no file": built-in defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ShopConfig> {
    let Some(path) = path else {
        tracing::debug!("no config file given; using defaults");
        return Ok(ShopConfig::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = ShopConfig::from_toml(&raw)
        .with_context(|| format!("invalid config {}", path.display()))?;

    tracing::info!(
        path = %path.display(),
        tools = config.tools.len(),
        "loaded shop config"
    );
    Ok(config)
}

/// Apply `--broker-host` / `--broker-port` on top of the file.
pub fn apply_broker_overrides(config: &mut ShopConfig, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        config.broker.host = host;
    }
    if let Some(port) = port {
        config.broker.port = port;
    }
}
