//! Start-up configuration loading

use anyhow::{Context, Result};
use crystal_common::Config;
use std::collections::HashMap;
use std::path::Path;
use toml::{Table, Value};

/// Load the layer configuration, or defaults when `path` does not exist
pub fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        return Ok(Config::default());
    }
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {path}"))?;
    toml::from_str(&config_str).with_context(|| format!("Failed to parse config file {path}"))
}

/// Read the auxiliary filter gateway file.
///
/// Settings are taken from a `[DEFAULT]` table when present, otherwise from
/// the top level. Values are kept as strings.
pub fn load_gateway_settings(path: &str) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read gateway config {path}"))?;
    parse_gateway_settings(&contents)
        .with_context(|| format!("Failed to parse gateway config {path}"))
}

fn parse_gateway_settings(contents: &str) -> Result<HashMap<String, String>> {
    let mut table: Table = toml::from_str(contents)?;
    if let Some(Value::Table(section)) = table.remove("DEFAULT") {
        table = section;
    }

    Ok(table
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, s)),
            Value::Table(_) | Value::Array(_) => None,
            other => Some((key, other.to_string())),
        })
        .collect())
}
