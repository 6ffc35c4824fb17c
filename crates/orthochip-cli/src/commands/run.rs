//! Run command implementation

use super::{load_config, open_catalog};
use crate::cli::RunArgs;
use crate::output::OutputWriter;
use crate::progress::{batch_progress_bar, finish_error, finish_success, update_batch};
use anyhow::{Context, Result};
use orthochip_pipeline::{
    load_query_points, BatchOptions, BatchOrchestrator, BatchReport, TilePipeline, TileSources,
};
use orthochip_store::{CsvBatchLogStore, FileTileSink, GeoJsonVectorSource, LocalRasterSource};
use std::fs;
use std::sync::Arc;
use tabled::Tabled;

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Outcome")]
    outcome: &'static str,
    #[tabled(rename = "Tiles")]
    tiles: usize,
}

pub fn execute(
    args: RunArgs,
    config_path: Option<&std::path::Path>,
    output: &OutputWriter,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.update_from_cli(args.into_overrides());

    // Batch-level validation happens before any file is touched
    let spec = Arc::new(config.to_chip_spec()?);
    let points_path = config.points_path_required()?;
    let points = load_query_points(&points_path)
        .with_context(|| format!("Failed to load query points from {}", points_path.display()))?;

    let (catalog_crs, resolver) = open_catalog(&config)?;

    let outpath = spec.outpath().to_path_buf();
    if !outpath.exists() {
        fs::create_dir_all(&outpath).with_context(|| {
            format!("Failed to create output directory {}", outpath.display())
        })?;
    }
    let sink = FileTileSink::new(&outpath)?;
    let log_store = CsvBatchLogStore::new(config.batch_log_path()?);

    let sources = TileSources {
        resolver,
        raster: Arc::new(LocalRasterSource::new(catalog_crs.clone())),
        vector: Arc::new(GeoJsonVectorSource::new(catalog_crs)),
        sink: Arc::new(sink),
    };
    let pipeline = TilePipeline::new(sources, config.class_attribute.value.clone());
    let options = BatchOptions {
        mode: config.mode.value,
        workers: config.workers.value,
        flush_every: config.flush_every.value,
    };
    let orchestrator = BatchOrchestrator::new(pipeline, Arc::new(log_store), options)?;

    output.info(format!(
        "Extracting {} tiles of shape {} at {} m into {}",
        points.len(),
        spec.shape(),
        spec.output_pixel_size(),
        outpath.display()
    ));

    let pb = batch_progress_bar(points.len(), output.is_json());
    let report = match orchestrator.run_points(&points, &spec, |progress| update_batch(&pb, progress)) {
        Ok(report) => {
            finish_success(&pb, &format!("Processed {} tiles", report.progress.done()));
            report
        }
        Err(err) => {
            finish_error(&pb, "Batch aborted");
            return Err(err).context("Batch run aborted");
        }
    };

    if output.is_json() {
        return output.result(&report);
    }
    print_report(&report, output);
    Ok(())
}

fn print_report(report: &BatchReport, output: &OutputWriter) {
    output.section("Batch Summary");
    output.kv("Mode", report.mode);
    output.kv("Workers", report.workers);
    output.kv("Elapsed", format!("{:.1}s", report.elapsed_secs));
    output.kv("Log flushes", report.flushes);

    output.section("This Run");
    output.table(vec![
        OutcomeRow { outcome: "processed", tiles: report.progress.processed },
        OutcomeRow { outcome: "skipped", tiles: report.progress.skipped },
        OutcomeRow { outcome: "failed", tiles: report.progress.failed },
    ]);

    output.section("Batch Log");
    let counts = report.counts;
    output.table(vec![
        OutcomeRow { outcome: "total", tiles: counts.total },
        OutcomeRow { outcome: "raster ok", tiles: counts.raster_ok },
        OutcomeRow { outcome: "vector ok", tiles: counts.vector_ok },
        OutcomeRow { outcome: "nodata present", tiles: counts.nodata_present },
        OutcomeRow { outcome: "skipped", tiles: counts.skipped },
        OutcomeRow { outcome: "failed", tiles: counts.failed },
    ]);

    if report.progress.failed > 0 {
        output.warning(format!(
            "{} tiles failed in this run; see `orthochip status --failures`",
            report.progress.failed
        ));
    } else {
        output.success("Batch complete");
    }
}
