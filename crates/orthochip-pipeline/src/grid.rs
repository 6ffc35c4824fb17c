//! Query grid generation over an area of interest

use crate::points::QueryPoint;
use geo::{Coord, Rect};
use orthochip_core::error::{OrthochipError, Result};
use orthochip_geo::CoordinateResolver;

/// Non-overlapping chip footprints tiling an area in the catalog CRS
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryGrid {
    pub area: Rect<f64>,
    pub pixel_size: f64,
    pub height: usize,
    pub width: usize,
}

impl QueryGrid {
    pub fn new(area: Rect<f64>, pixel_size: f64, height: usize, width: usize) -> Result<Self> {
        if !pixel_size.is_finite() || pixel_size <= 0.0 {
            return Err(OrthochipError::validation("pixel_size", "must be positive"));
        }
        if height == 0 || width == 0 {
            return Err(OrthochipError::validation("shape", "height and width must be positive"));
        }
        Ok(Self { area, pixel_size, height, width })
    }

    /// Ground size (width, height) of one chip
    pub fn footprint(&self) -> (f64, f64) {
        (self.width as f64 * self.pixel_size, self.height as f64 * self.pixel_size)
    }

    /// Whole footprints along (rows, cols); partial footprints at the edges are dropped
    pub fn dimensions(&self) -> (usize, usize) {
        let (fw, fh) = self.footprint();
        let rows = (self.area.height() / fh + 1e-9).floor().max(0.0) as usize;
        let cols = (self.area.width() / fw + 1e-9).floor().max(0.0) as usize;
        (rows, cols)
    }

    /// Centroid of footprint (row, col), rows counted down from the top edge
    pub fn centroid(&self, row: usize, col: usize) -> Coord<f64> {
        let (fw, fh) = self.footprint();
        Coord {
            x: self.area.min().x + (col as f64 + 0.5) * fw,
            y: self.area.max().y - (row as f64 + 0.5) * fh,
        }
    }
}

/// Query points at the centroids of footprints inside catalog coverage
///
/// Points are emitted row-major from the top-left with ids `"{row}_{col}"`.
pub fn generate_query_grid(grid: &QueryGrid, resolver: &CoordinateResolver) -> Result<Vec<QueryPoint>> {
    let (rows, cols) = grid.dimensions();
    let catalog = resolver.catalog();
    let mut points = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            let centroid = grid.centroid(row, col);
            if catalog.point_intersect(centroid).is_empty() {
                continue;
            }
            let geographic = resolver.transformer().transform(
                resolver.catalog_crs(),
                resolver.geographic_crs(),
                centroid,
            )?;
            points.push(QueryPoint {
                id: format!("{}_{}", row, col),
                lat: geographic.y,
                lon: geographic.x,
            });
        }
    }

    tracing::info!(rows, cols, points = points.len(), "Generated query grid");
    Ok(points)
}
