//! Command implementations

mod config;
mod grid;
mod run;
mod status;

use crate::cli::{Cli, Commands};
use crate::errors;
use crate::output::OutputWriter;
use anyhow::{Context, Result};
use orthochip_core::config::LayeredConfig;
use orthochip_core::models::Crs;
use orthochip_geo::{CatalogIndex, CoordinateResolver, ProjTransformer};
use orthochip_store::load_catalog_geojson;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration file picked up from the working directory
const DEFAULT_CONFIG_FILE: &str = "orthochip.toml";

/// Execute a CLI command
pub fn execute(cli: Cli) -> Result<()> {
    let output = OutputWriter::new(cli.json);
    let config_path = match cli.config {
        Some(path) => Some(path),
        None => default_config_file()?,
    };
    let config_path = config_path.as_deref();

    match cli.command {
        Commands::Run(args) => run::execute(args, config_path, &output),
        Commands::Grid(args) => grid::execute(args, config_path, &output),
        Commands::Status(args) => status::execute(args, config_path, &output),
        Commands::Config => config::execute(config_path, &output),
    }
}

/// `orthochip.toml` in the working directory, if there is one
fn default_config_file() -> Result<Option<PathBuf>> {
    let candidate = std::env::current_dir()
        .context("Failed to read the working directory")?
        .join(DEFAULT_CONFIG_FILE);
    Ok(candidate.is_file().then_some(candidate))
}

/// Defaults, then the config file, then `ORTHOCHIP_*` variables
fn load_config(config_path: Option<&Path>) -> Result<LayeredConfig> {
    let mut config = LayeredConfig::with_defaults();
    if let Some(path) = config_path {
        config = config
            .load_from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?;
    }
    Ok(config.load_from_env())
}

/// Load the catalog and wire it to a PROJ-backed resolver
fn open_catalog(config: &LayeredConfig) -> Result<(Crs, CoordinateResolver)> {
    let catalog_path = config.catalog_path_required()?;
    if !catalog_path.is_file() {
        return Err(errors::catalog_not_found(&catalog_path).into());
    }

    let (catalog_crs, entries) = load_catalog_geojson(&catalog_path)?;
    if entries.is_empty() {
        return Err(errors::empty_catalog(&catalog_path).into());
    }
    tracing::info!(
        sheets = entries.len(),
        crs = %catalog_crs,
        "Loaded catalog {}",
        catalog_path.display()
    );

    let index = CatalogIndex::new(catalog_crs.clone(), entries);
    let resolver = CoordinateResolver::new(
        Arc::new(index),
        Arc::new(ProjTransformer::new()),
        config.geographic_crs(),
    );
    Ok((catalog_crs, resolver))
}
