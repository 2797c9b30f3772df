//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Prints the configuration as loaded, secret references unexpanded.
pub fn dump(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| ClientError::config(format!("failed to serialize config: {e}")))?;
    println!("# {}", path.display());
    println!("{rendered}");
    Ok(())
}

/// Resolves every secret and checks the values the engine needs.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    let engine = config.engine_config()?;
    let providers = engine.configured_providers();
    if providers.is_empty() {
        println!("No provider configured; add a [google] or [microsoft] section.");
    }
    for provider in providers {
        println!("{provider} credentials are valid.");
    }
    println!("Configuration is valid.");
    Ok(())
}

pub fn path(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    println!("config: {}", path.display());
    println!("database: {}", config.database_path().display());
    Ok(())
}
