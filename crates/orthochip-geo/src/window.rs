//! Window Planner: pixel-exact read windows and output transforms.
//!
//! The window is centred on the source pixel containing the query point with
//! origin `center - floor(size / 2)`. For even sizes the point therefore sits
//! half a pixel right/below the geometric centre; this is deterministic and
//! kept as-is.

use geo::{Coord, Rect};
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{Affine, ChipSpec, OverviewLevel, PixelWindow, RasterGrid};

/// Relative pixel-size difference tolerated between request and source level
const PIXEL_SIZE_TOLERANCE: f64 = 0.01;

/// Where to read and how the output chip is georeferenced
///
/// Computed once per tile and shared verbatim by the raster extractor and
/// the vector rasterizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionWindow {
    pub level: OverviewLevel,
    /// Read window in the source grid at `level`
    pub source: PixelWindow,
    /// Source transform composed with the window offset
    pub source_transform: Affine,
    pub out_height: usize,
    pub out_width: usize,
    /// Transform of the output chip; differs from `source_transform` when resampling
    pub transform: Affine,
}

impl ExtractionWindow {
    /// Ground footprint of the output chip
    pub fn bounds(&self) -> Rect<f64> {
        self.transform.bounds(self.out_width, self.out_height)
    }

    pub fn is_resampled(&self) -> bool {
        self.source.width != self.out_width || self.source.height != self.out_height
    }
}

/// Plan the extraction window for a projected point on a source grid
///
/// `grid` must be the source opened at `spec.pixel_size().level()`.
pub fn plan_window(point: Coord<f64>, spec: &ChipSpec, grid: &RasterGrid) -> Result<ExtractionWindow> {
    let level = spec.pixel_size().level();

    let (source_px, _) = grid.transform.pixel_size();
    let requested = spec.pixel_size().meters();
    if (source_px - requested).abs() > PIXEL_SIZE_TOLERANCE * requested {
        tracing::warn!(
            requested,
            source = source_px,
            %level,
            "Source pixel size differs from the requested pixel size"
        );
    }

    let (row, col) = grid.transform.index(point.x, point.y).ok_or_else(|| {
        OrthochipError::validation("transform", "source transform is not invertible")
    })?;

    let (src_height, src_width) = spec.source_extent();
    let col_off = col - (src_width / 2) as i64;
    let row_off = row - (src_height / 2) as i64;
    let source = PixelWindow::new(col_off, row_off, src_width, src_height);
    let source_transform = grid.transform.translated(col_off, row_off);

    let shape = spec.shape();
    let transform = if src_width == shape.width && src_height == shape.height {
        source_transform
    } else {
        source_transform.scaled(
            src_width as f64 / shape.width as f64,
            src_height as f64 / shape.height as f64,
        )
    };

    tracing::debug!(
        %level,
        row,
        col,
        col_off,
        row_off,
        width = src_width,
        height = src_height,
        "Planned extraction window"
    );

    Ok(ExtractionWindow {
        level,
        source,
        source_transform,
        out_height: shape.height,
        out_width: shape.width,
        transform,
    })
}
