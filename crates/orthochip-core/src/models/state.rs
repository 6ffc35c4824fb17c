//! Per-tile outcome tracking and the batch log.

use super::class_code::ClassCode;
use crate::error::{OrthochipError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Outcome of one processing axis (raster or vector)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisOutcome {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

impl AxisOutcome {
    fn from_success(ok: bool) -> Self {
        if ok {
            AxisOutcome::Succeeded
        } else {
            AxisOutcome::Failed
        }
    }
}

/// Combined position of a tile in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TilePhase {
    Pending,
    RasterOk,
    RasterFailed,
    VectorOk,
    VectorFailed,
}

impl fmt::Display for TilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TilePhase::Pending => "pending",
            TilePhase::RasterOk => "raster_ok",
            TilePhase::RasterFailed => "raster_failed",
            TilePhase::VectorOk => "vector_ok",
            TilePhase::VectorFailed => "vector_failed",
        };
        write!(f, "{}", name)
    }
}

/// Mutable outcome record for one tile
///
/// Each axis moves out of `Pending` at most once. Re-setting an axis to the
/// outcome it already holds is a no-op; changing it is a [`OrthochipError::StateTransition`].
/// The vector axis can only resolve after the raster axis succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct TileState {
    id: String,
    raster: AxisOutcome,
    vector: AxisOutcome,
    nodata_present: bool,
    skipped: bool,
    class_pixels: BTreeMap<ClassCode, u64>,
    total_pixels: u64,
    feature_count: usize,
    error: Option<String>,
}

impl TileState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raster: AxisOutcome::Pending,
            vector: AxisOutcome::Pending,
            nodata_present: false,
            skipped: false,
            class_pixels: BTreeMap::new(),
            total_pixels: 0,
            feature_count: 0,
            error: None,
        }
    }

    /// State of a tile whose outputs already exist on disk
    pub fn skipped(id: impl Into<String>) -> Self {
        let mut state = Self::new(id);
        state.raster = AxisOutcome::Succeeded;
        state.vector = AxisOutcome::Succeeded;
        state.skipped = true;
        state
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn raster(&self) -> AxisOutcome {
        self.raster
    }

    pub fn vector(&self) -> AxisOutcome {
        self.vector
    }

    pub fn raster_ok(&self) -> bool {
        self.raster == AxisOutcome::Succeeded
    }

    pub fn vector_ok(&self) -> bool {
        self.vector == AxisOutcome::Succeeded
    }

    pub fn vector_attempted(&self) -> bool {
        self.vector != AxisOutcome::Pending
    }

    pub fn nodata_present(&self) -> bool {
        self.nodata_present
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn phase(&self) -> TilePhase {
        match (self.raster, self.vector) {
            (AxisOutcome::Pending, _) => TilePhase::Pending,
            (AxisOutcome::Failed, _) => TilePhase::RasterFailed,
            (AxisOutcome::Succeeded, AxisOutcome::Pending) => TilePhase::RasterOk,
            (AxisOutcome::Succeeded, AxisOutcome::Succeeded) => TilePhase::VectorOk,
            (AxisOutcome::Succeeded, AxisOutcome::Failed) => TilePhase::VectorFailed,
        }
    }

    /// Resolve the raster axis
    pub fn set_raster(&mut self, ok: bool) -> Result<()> {
        let outcome = AxisOutcome::from_success(ok);
        match self.raster {
            AxisOutcome::Pending => {
                self.raster = outcome;
                Ok(())
            }
            current if current == outcome => Ok(()),
            current => Err(self.transition_error(format!("raster already {:?}", current))),
        }
    }

    /// Resolve the vector axis; requires a successful raster axis
    pub fn set_vector(&mut self, ok: bool) -> Result<()> {
        if !self.raster_ok() {
            return Err(self.transition_error(format!(
                "vector outcome requires raster success, raster is {:?}",
                self.raster
            )));
        }
        let outcome = AxisOutcome::from_success(ok);
        match self.vector {
            AxisOutcome::Pending => {
                self.vector = outcome;
                Ok(())
            }
            current if current == outcome => Ok(()),
            current => Err(self.transition_error(format!("vector already {:?}", current))),
        }
    }

    pub fn mark_nodata(&mut self) {
        self.nodata_present = true;
    }

    /// Store mask statistics: per-class covered pixels out of `total_pixels`
    pub fn record_mask(
        &mut self,
        class_pixels: BTreeMap<ClassCode, u64>,
        total_pixels: u64,
        feature_count: usize,
    ) {
        self.class_pixels = class_pixels;
        self.total_pixels = total_pixels;
        self.feature_count = feature_count;
    }

    /// Keep the first error message seen for this tile
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// Fail whichever axis is still pending and remember why
    pub fn fail(&mut self, err: &OrthochipError) {
        self.fail_with(err.to_string());
    }

    /// Like [`TileState::fail`] for conditions that are not an [`OrthochipError`]
    pub fn fail_with(&mut self, message: impl Into<String>) {
        self.record_error(message);
        match (self.raster, self.vector) {
            (AxisOutcome::Pending, _) => self.raster = AxisOutcome::Failed,
            (AxisOutcome::Succeeded, AxisOutcome::Pending) => self.vector = AxisOutcome::Failed,
            _ => {}
        }
    }

    pub fn summary(&self) -> TileSummary {
        let classes = ClassCode::ALL
            .iter()
            .map(|&code| {
                let pixels = self.class_pixels.get(&code).copied().unwrap_or(0);
                let fraction = if self.total_pixels > 0 {
                    pixels as f64 / self.total_pixels as f64
                } else {
                    0.0
                };
                (code, ClassShare { pixels, fraction })
            })
            .collect();

        TileSummary {
            id: self.id.clone(),
            raster_ok: self.raster_ok(),
            vector_attempted: self.vector_attempted(),
            vector_ok: self.vector_ok(),
            nodata_present: self.nodata_present,
            skipped: self.skipped,
            feature_count: self.feature_count,
            error: self.error.clone(),
            classes,
        }
    }

    fn transition_error(&self, reason: String) -> OrthochipError {
        OrthochipError::StateTransition { id: self.id.clone(), reason }
    }
}

/// Pixel count and share of the chip for one class
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassShare {
    pub pixels: u64,
    pub fraction: f64,
}

/// Terminal, flat view of a tile outcome; one batch log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSummary {
    pub id: String,
    pub raster_ok: bool,
    pub vector_attempted: bool,
    pub vector_ok: bool,
    pub nodata_present: bool,
    pub skipped: bool,
    pub feature_count: usize,
    pub error: Option<String>,
    /// Every class of the vocabulary, zero when absent
    pub classes: BTreeMap<ClassCode, ClassShare>,
}

impl TileSummary {
    /// A tile failed when either attempted axis failed
    pub fn is_failure(&self) -> bool {
        !self.raster_ok || (self.vector_attempted && !self.vector_ok)
    }
}

/// Aggregate counters over a batch log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub total: usize,
    pub raster_ok: usize,
    pub vector_ok: usize,
    pub nodata_present: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Ordered table of tile outcomes keyed by identifier
#[derive(Debug, Clone, Default)]
pub struct BatchLog {
    rows: Vec<TileSummary>,
    index: HashMap<String, usize>,
}

impl BatchLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted rows; a later row replaces an earlier one with the same id
    pub fn from_rows(rows: impl IntoIterator<Item = TileSummary>) -> Self {
        let mut log = Self::new();
        for row in rows {
            log.record(row);
        }
        log
    }

    /// Insert or replace the row for `summary.id`. Returns true when a row was replaced.
    pub fn record(&mut self, summary: TileSummary) -> bool {
        match self.index.get(&summary.id) {
            Some(&pos) => {
                self.rows[pos] = summary;
                true
            }
            None => {
                self.index.insert(summary.id.clone(), self.rows.len());
                self.rows.push(summary);
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TileSummary> {
        self.index.get(id).map(|&pos| &self.rows[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileSummary> {
        self.rows.iter()
    }

    pub fn counts(&self) -> BatchCounts {
        self.rows.iter().fold(
            BatchCounts { total: self.rows.len(), ..Default::default() },
            |mut counts, row| {
                counts.raster_ok += row.raster_ok as usize;
                counts.vector_ok += row.vector_ok as usize;
                counts.nodata_present += row.nodata_present as usize;
                counts.skipped += row.skipped as usize;
                counts.failed += row.is_failure() as usize;
                counts
            },
        )
    }
}
