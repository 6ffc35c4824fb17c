//! In-memory adapters for development and testing.
//!
//! Poisoned locks are recovered with `PoisonError::into_inner`; the guarded
//! maps stay consistent because every update is a single insert.

use geo::{BoundingRect, Coord, Intersects, Rect};
use ndarray::{s, Array3};
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{
    Affine, BatchLog, Crs, ImageChip, MaskChip, OverviewLevel, PixelWindow, RasterGrid,
    VectorExtract, VectorFeature,
};
use orthochip_core::ports::{
    BatchLogStore, PointTransformer, RasterHandle, RasterSource, TileSink, VectorHandle,
    VectorSource, WindowRead,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// One raster level held in memory
#[derive(Debug, Clone)]
struct MemoryRaster {
    grid: RasterGrid,
    data: Arc<Array3<u8>>,
}

/// In-memory implementation of RasterSource
#[derive(Debug, Clone, Default)]
pub struct MemoryRasterSource {
    rasters: Arc<RwLock<HashMap<(String, i8), MemoryRaster>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    opens: Arc<AtomicUsize>,
}

impl MemoryRasterSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register pixels (bands, rows, cols) for a locator at one level
    pub fn insert(
        &self,
        locator: impl Into<String>,
        level: OverviewLevel,
        transform: Affine,
        crs: Crs,
        data: Array3<u8>,
    ) {
        let (bands, height, width) = data.dim();
        let grid = RasterGrid { width, height, bands, transform, crs };
        self.rasters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((locator.into(), level.value()), MemoryRaster { grid, data: Arc::new(data) });
    }

    /// Make every open of `locator` fail with a source error
    pub fn fail(&self, locator: impl Into<String>) {
        self.failing.write().unwrap_or_else(PoisonError::into_inner).insert(locator.into());
    }

    /// Number of successful and failed open calls
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl RasterSource for MemoryRasterSource {
    fn open(&self, locator: &str, level: OverviewLevel) -> Result<Box<dyn RasterHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.failing.read().unwrap_or_else(PoisonError::into_inner).contains(locator) {
            return Err(OrthochipError::source_io(locator, "simulated read failure"));
        }

        let rasters = self.rasters.read().unwrap_or_else(PoisonError::into_inner);
        let raster = rasters.get(&(locator.to_string(), level.value())).ok_or_else(|| {
            OrthochipError::source_io(locator, format!("no raster at {}", level))
        })?;

        Ok(Box::new(MemoryRasterHandle { raster: raster.clone() }))
    }
}

struct MemoryRasterHandle {
    raster: MemoryRaster,
}

impl RasterHandle for MemoryRasterHandle {
    fn grid(&self) -> &RasterGrid {
        &self.raster.grid
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<WindowRead> {
        let grid = &self.raster.grid;
        let Some(clipped) = window.clip_to(grid.width, grid.height) else {
            return Ok(WindowRead { data: Array3::zeros((grid.bands, 0, 0)), clipped: None });
        };

        let rows = clipped.row_off as usize..clipped.row_off as usize + clipped.height;
        let cols = clipped.col_off as usize..clipped.col_off as usize + clipped.width;
        let data = self.raster.data.slice(s![.., rows, cols]).to_owned();
        Ok(WindowRead { data, clipped: Some(clipped) })
    }
}

/// In-memory implementation of VectorSource
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorSource {
    sheets: Arc<RwLock<HashMap<String, (Crs, Arc<Vec<VectorFeature>>)>>>,
    opens: Arc<AtomicUsize>,
}

impl MemoryVectorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<String>, crs: Crs, features: Vec<VectorFeature>) {
        self.sheets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.into(), (crs, Arc::new(features)));
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl VectorSource for MemoryVectorSource {
    fn open(&self, locator: &str) -> Result<Box<dyn VectorHandle>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let sheets = self.sheets.read().unwrap_or_else(PoisonError::into_inner);
        let (crs, features) = sheets
            .get(locator)
            .ok_or_else(|| OrthochipError::source_io(locator, "no such cadastre sheet"))?;
        Ok(Box::new(MemoryVectorHandle { crs: crs.clone(), features: Arc::clone(features) }))
    }
}

struct MemoryVectorHandle {
    crs: Crs,
    features: Arc<Vec<VectorFeature>>,
}

impl VectorHandle for MemoryVectorHandle {
    fn crs(&self) -> &Crs {
        &self.crs
    }

    fn filter(
        &mut self,
        bbox: &Rect<f64>,
        predicate: &dyn Fn(&VectorFeature) -> bool,
    ) -> Result<Vec<VectorFeature>> {
        Ok(self
            .features
            .iter()
            .filter(|feature| {
                feature.geometry.bounding_rect().is_some_and(|rect| rect.intersects(bbox))
            })
            .filter(|feature| predicate(feature))
            .cloned()
            .collect())
    }
}

/// In-memory implementation of TileSink
#[derive(Debug, Clone, Default)]
pub struct MemoryTileSink {
    images: Arc<RwLock<HashMap<String, ImageChip>>>,
    masks: Arc<RwLock<HashMap<String, MaskChip>>>,
    extracts: Arc<RwLock<HashMap<String, VectorExtract>>>,
    existing: Arc<RwLock<HashSet<String>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryTileSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend outputs for `id` were produced by an earlier run
    pub fn mark_existing(&self, id: impl Into<String>) {
        self.existing.write().unwrap_or_else(PoisonError::into_inner).insert(id.into());
    }

    pub fn image(&self, id: &str) -> Option<ImageChip> {
        self.images.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    pub fn mask(&self, id: &str) -> Option<MaskChip> {
        self.masks.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    pub fn extract(&self, id: &str) -> Option<VectorExtract> {
        self.extracts.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    /// Total number of write calls of any kind
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl TileSink for MemoryTileSink {
    fn outputs_exist(&self, id: &str) -> bool {
        if self.existing.read().unwrap_or_else(PoisonError::into_inner).contains(id) {
            return true;
        }
        self.images.read().unwrap_or_else(PoisonError::into_inner).contains_key(id)
            && self.masks.read().unwrap_or_else(PoisonError::into_inner).contains_key(id)
    }

    fn write_image(&self, id: &str, chip: &ImageChip) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.images
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), chip.clone());
        Ok(())
    }

    fn write_mask(&self, id: &str, mask: &MaskChip) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.masks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), mask.clone());
        Ok(())
    }

    fn write_vector_extract(&self, id: &str, extract: &VectorExtract) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.extracts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), extract.clone());
        Ok(())
    }
}

/// Point transformer driven by registered affine mappings between EPSG codes
///
/// Matching reference systems pass points through unchanged.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransformer {
    mappings: Arc<RwLock<HashMap<(u32, u32), Affine>>>,
}

impl MemoryTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `from` to `to` by `mapping`; the inverse direction is registered too
    pub fn with_mapping(self, from: &Crs, to: &Crs, mapping: Affine) -> Self {
        {
            let mut mappings = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
            mappings.insert((from.epsg, to.epsg), mapping);
            if let Some(inverse) = mapping.inverse() {
                mappings.insert((to.epsg, from.epsg), inverse);
            }
        }
        self
    }
}

impl PointTransformer for MemoryTransformer {
    fn transform(&self, from: &Crs, to: &Crs, point: Coord<f64>) -> Result<Coord<f64>> {
        if from.matches(to) {
            return Ok(point);
        }
        let mappings = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
        let mapping = mappings.get(&(from.epsg, to.epsg)).ok_or_else(|| {
            OrthochipError::Projection {
                from: from.to_string(),
                to: to.to_string(),
                reason: "no mapping registered".to_string(),
            }
        })?;
        Ok(mapping.apply(point.x, point.y))
    }
}

/// In-memory implementation of BatchLogStore
#[derive(Debug, Clone, Default)]
pub struct MemoryBatchLogStore {
    log: Arc<RwLock<BatchLog>>,
    flushes: Arc<AtomicUsize>,
}

impl MemoryBatchLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously persisted log
    pub fn with_log(log: BatchLog) -> Self {
        Self { log: Arc::new(RwLock::new(log)), flushes: Arc::default() }
    }

    /// Copy of the last flushed log
    pub fn snapshot(&self) -> BatchLog {
        self.log.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl BatchLogStore for MemoryBatchLogStore {
    fn load(&self) -> Result<BatchLog> {
        Ok(self.snapshot())
    }

    fn flush(&self, log: &BatchLog) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        *self.log.write().unwrap_or_else(PoisonError::into_inner) = log.clone();
        Ok(())
    }
}
