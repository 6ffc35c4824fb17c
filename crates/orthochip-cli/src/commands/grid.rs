//! Grid command implementation

use super::{load_config, open_catalog};
use crate::cli::GridArgs;
use crate::output::OutputWriter;
use anyhow::{Context, Result};
use orthochip_core::OrthochipError;
use orthochip_pipeline::{generate_query_grid, write_query_points, QueryGrid};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct GridOutput {
    rows: usize,
    cols: usize,
    points: usize,
    footprint_m: (f64, f64),
    output: PathBuf,
}

pub fn execute(args: GridArgs, config_path: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.update_from_cli(args.overrides());

    let pixel_size = config
        .pixel_size
        .value
        .ok_or_else(|| OrthochipError::ConfigMissing { key: "pixel_size".to_string() })?;
    let [_, height, width] = config
        .shape
        .value
        .ok_or_else(|| OrthochipError::ConfigMissing { key: "shape".to_string() })?;

    let grid = QueryGrid::new(args.bbox, pixel_size, height, width)?;
    let (rows, cols) = grid.dimensions();
    let (_, resolver) = open_catalog(&config)?;

    let points = generate_query_grid(&grid, &resolver)?;
    write_query_points(&args.output, &points)
        .with_context(|| format!("Failed to write query points to {}", args.output.display()))?;

    if output.is_json() {
        return output.result(GridOutput {
            rows,
            cols,
            points: points.len(),
            footprint_m: grid.footprint(),
            output: args.output,
        });
    }

    output.kv("Grid", format!("{} rows x {} cols", rows, cols));
    output.kv("Inside coverage", points.len());
    if points.is_empty() {
        output.warning("No chip footprint falls inside catalog coverage");
    }
    output.success(format!("Wrote {} query points to {}", points.len(), args.output.display()));
    Ok(())
}
