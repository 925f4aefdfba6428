//! `placeharvest check-config`: validate and print the resolved configuration.

use anyhow::Result;
use placeharvest::config::HarvestConfig;
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = HarvestConfig::load(config_path)?;
    config.validate()?;
    let selectors = config.selectors()?;
    tracing::debug!(name_probes = selectors.name.len(), "selector set is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
