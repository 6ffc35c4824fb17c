use crate::error::Result;
use crate::models::{CatalogEntry, Crs, OverviewLevel, PixelWindow, RasterGrid, VectorFeature};
use geo::{Coord, Rect};
use ndarray::Array3;

/// Pixels returned by a window read
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRead {
    /// Band data as (bands, rows, cols) covering `clipped`
    pub data: Array3<u8>,
    /// Part of the requested window that lies inside the raster, if any
    pub clipped: Option<PixelWindow>,
}

impl WindowRead {
    /// True when the read covers the requested window completely
    pub fn is_complete(&self, requested: &PixelWindow) -> bool {
        self.clipped.as_ref() == Some(requested)
    }
}

/// An imagery source opened at one resolution level
pub trait RasterHandle {
    /// Grid size, transform and CRS at the opened level
    fn grid(&self) -> &RasterGrid;

    /// Read a pixel window, clipped to the raster extent
    fn read_window(&mut self, window: &PixelWindow) -> Result<WindowRead>;
}

/// Port for opening imagery sources
pub trait RasterSource: Send + Sync {
    /// Open the source behind `locator` at the given overview level
    fn open(&self, locator: &str, level: OverviewLevel) -> Result<Box<dyn RasterHandle>>;
}

/// An opened cadastre sheet
pub trait VectorHandle {
    fn crs(&self) -> &Crs;

    /// Features whose envelope intersects `bbox` and that satisfy `predicate`
    fn filter(
        &mut self,
        bbox: &Rect<f64>,
        predicate: &dyn Fn(&VectorFeature) -> bool,
    ) -> Result<Vec<VectorFeature>>;
}

/// Port for opening cadastre sources
pub trait VectorSource: Send + Sync {
    fn open(&self, locator: &str) -> Result<Box<dyn VectorHandle>>;
}

/// Port for the pre-built catalog of sheets
pub trait Catalog: Send + Sync {
    /// CRS of coverage geometries and lookup points
    fn crs(&self) -> &Crs;

    /// Entries whose coverage contains `point`, in catalog load order
    fn point_intersect(&self, point: Coord<f64>) -> Vec<&CatalogEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Port for reprojecting points between reference systems
pub trait PointTransformer: Send + Sync {
    fn transform(&self, from: &Crs, to: &Crs, point: Coord<f64>) -> Result<Coord<f64>>;
}
