//! Config command implementation

use super::load_config;
use crate::output::OutputWriter;
use anyhow::Result;
use orthochip_core::config::ConfigSource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tabled::Tabled;

#[derive(Serialize)]
struct ConfigEntry {
    value: String,
    source: ConfigSource,
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Source")]
    source: String,
}

pub fn execute(config_path: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let config = load_config(config_path)?;
    let entries: BTreeMap<String, ConfigEntry> = config
        .to_inspection_map()
        .into_iter()
        .map(|(key, (value, source))| (key, ConfigEntry { value, source }))
        .collect();

    if output.is_json() {
        return output.result(entries);
    }

    output.section("Configuration");
    if let Some(path) = config_path {
        output.kv("File", path.display());
    }
    output.table(
        entries
            .into_iter()
            .map(|(key, entry)| ConfigRow {
                key,
                value: entry.value,
                source: format!("{:?}", entry.source).to_lowercase(),
            })
            .collect(),
    );
    Ok(())
}
