//! Status command implementation

use super::load_config;
use crate::cli::StatusArgs;
use crate::errors;
use crate::output::OutputWriter;
use anyhow::Result;
use orthochip_core::models::{BatchCounts, TileSummary};
use orthochip_core::ports::BatchLogStore;
use orthochip_store::CsvBatchLogStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::Tabled;

#[derive(Serialize)]
struct StatusOutput {
    log_path: PathBuf,
    counts: BatchCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<Vec<TileSummary>>,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Outcome")]
    outcome: &'static str,
    #[tabled(rename = "Tiles")]
    tiles: usize,
}

#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "Tile")]
    id: String,
    #[tabled(rename = "Raster")]
    raster: &'static str,
    #[tabled(rename = "Vector")]
    vector: &'static str,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&TileSummary> for FailureRow {
    fn from(row: &TileSummary) -> Self {
        let axis = |ok: bool| if ok { "ok" } else { "failed" };
        Self {
            id: row.id.clone(),
            raster: axis(row.raster_ok),
            vector: if row.vector_attempted { axis(row.vector_ok) } else { "-" },
            error: row.error.clone().unwrap_or_default(),
        }
    }
}

pub fn execute(args: StatusArgs, config_path: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let log_path = match args.log {
        Some(path) => path,
        None => load_config(config_path)?.batch_log_path()?,
    };
    if !log_path.is_file() {
        return Err(errors::batch_log_not_found(&log_path).into());
    }

    let log = CsvBatchLogStore::new(&log_path).load()?;
    let counts = log.counts();
    let failures: Vec<TileSummary> = log.iter().filter(|row| row.is_failure()).cloned().collect();

    if output.is_json() {
        return output.result(StatusOutput {
            log_path,
            counts,
            failures: args.failures.then_some(failures),
        });
    }

    output.section("Batch Status");
    output.kv("Log", log_path.display());
    output.table(vec![
        CountRow { outcome: "total", tiles: counts.total },
        CountRow { outcome: "raster ok", tiles: counts.raster_ok },
        CountRow { outcome: "vector ok", tiles: counts.vector_ok },
        CountRow { outcome: "nodata present", tiles: counts.nodata_present },
        CountRow { outcome: "skipped", tiles: counts.skipped },
        CountRow { outcome: "failed", tiles: counts.failed },
    ]);

    if args.failures {
        output.section("Failed Tiles");
        output.table(failures.iter().map(FailureRow::from).collect());
    } else if counts.failed > 0 {
        output.info("List failed tiles with: orthochip status --failures");
    }
    Ok(())
}
