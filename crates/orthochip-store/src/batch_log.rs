//! CSV persistence of the batch log

use crate::sink::write_atomic;
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{BatchLog, ClassCode, ClassShare, TileSummary};
use orthochip_core::ports::BatchLogStore;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

const FIXED_COLUMNS: [&str; 8] = [
    "id",
    "raster_ok",
    "vector_attempted",
    "vector_ok",
    "nodata_present",
    "skipped",
    "feature_count",
    "error",
];

fn csv_error(path: &Path, err: csv::Error) -> OrthochipError {
    OrthochipError::Serialization(format!("batch log {}: {}", path.display(), err))
}

/// Header row: fixed columns, then a count and fraction column per class code
pub fn batch_log_header() -> Vec<String> {
    let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    for code in ClassCode::ALL {
        header.push(format!("count_{}", code.code()));
        header.push(format!("frac_{}", code.code()));
    }
    header
}

/// Batch log stored as a CSV table, replaced atomically on every flush
#[derive(Debug, Clone)]
pub struct CsvBatchLogStore {
    path: PathBuf,
}

impl CsvBatchLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_rows(&self, target: &Path, log: &BatchLog) -> Result<()> {
        let mut writer = csv::Writer::from_path(target).map_err(|e| csv_error(target, e))?;
        writer.write_record(batch_log_header()).map_err(|e| csv_error(target, e))?;

        for row in log.iter() {
            let mut record = vec![
                row.id.clone(),
                row.raster_ok.to_string(),
                row.vector_attempted.to_string(),
                row.vector_ok.to_string(),
                row.nodata_present.to_string(),
                row.skipped.to_string(),
                row.feature_count.to_string(),
                row.error.clone().unwrap_or_default(),
            ];
            for code in ClassCode::ALL {
                let share = row.classes.get(&code).copied().unwrap_or_default();
                record.push(share.pixels.to_string());
                record.push(share.fraction.to_string());
            }
            writer.write_record(&record).map_err(|e| csv_error(target, e))?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl BatchLogStore for CsvBatchLogStore {
    fn load(&self) -> Result<BatchLog> {
        if !self.path.exists() {
            return Ok(BatchLog::new());
        }

        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| csv_error(&self.path, e))?;
        let columns: HashMap<String, usize> = reader
            .headers()
            .map_err(|e| csv_error(&self.path, e))?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        if !columns.contains_key("id") {
            return Err(OrthochipError::Serialization(format!(
                "batch log {} has no 'id' column",
                self.path.display()
            )));
        }

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| csv_error(&self.path, e))?;
            let field = |name: &str| columns.get(name).and_then(|&i| record.get(i)).unwrap_or("");
            let invalid = |name: &str| {
                OrthochipError::Serialization(format!(
                    "batch log {} row {}: invalid {} '{}'",
                    self.path.display(),
                    line + 2,
                    name,
                    field(name)
                ))
            };
            let flag = |name: &str| -> Result<bool> {
                match field(name) {
                    "" => Ok(false),
                    value => value.parse().map_err(|_| invalid(name)),
                }
            };

            let mut classes = BTreeMap::new();
            for code in ClassCode::ALL {
                let count_key = format!("count_{}", code.code());
                let frac_key = format!("frac_{}", code.code());
                let pixels = match field(count_key.as_str()) {
                    "" => 0,
                    value => value.parse().map_err(|_| invalid(count_key.as_str()))?,
                };
                let fraction = match field(frac_key.as_str()) {
                    "" => 0.0,
                    value => value.parse().map_err(|_| invalid(frac_key.as_str()))?,
                };
                classes.insert(code, ClassShare { pixels, fraction });
            }

            let error = match field("error") {
                "" => None,
                message => Some(message.to_string()),
            };
            let feature_count = match field("feature_count") {
                "" => 0,
                value => value.parse().map_err(|_| invalid("feature_count"))?,
            };

            rows.push(TileSummary {
                id: field("id").to_string(),
                raster_ok: flag("raster_ok")?,
                vector_attempted: flag("vector_attempted")?,
                vector_ok: flag("vector_ok")?,
                nodata_present: flag("nodata_present")?,
                skipped: flag("skipped")?,
                feature_count,
                error,
                classes,
            });
        }

        tracing::debug!(path = %self.path.display(), rows = rows.len(), "Loaded batch log");
        Ok(BatchLog::from_rows(rows))
    }

    fn flush(&self, log: &BatchLog) -> Result<()> {
        write_atomic(&self.path, |tmp| self.write_rows(tmp, log))?;
        tracing::info!(path = %self.path.display(), rows = log.len(), "Flushed batch log");
        Ok(())
    }
}
