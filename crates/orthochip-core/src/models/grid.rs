//! Pixel grids, affine georeferencing and pixel windows.

use super::geometry::Crs;
use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};

/// Tolerance applied before flooring world-to-pixel conversions so that
/// coordinates sitting exactly on a pixel edge land in the pixel they start.
const INDEX_EPSILON: f64 = 1e-9;

/// Affine transform mapping (col, row) pixel coordinates to projected (x, y)
///
/// Coefficient layout follows the usual raster convention:
/// `x = a * col + b * row + c`, `y = d * col + e * row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with the given top-left origin and pixel size
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, -pixel_height.abs(), origin_y)
    }

    /// Build from a GDAL geotransform `[c, a, b, f, d, e]`
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    /// Convert to a GDAL geotransform `[c, a, b, f, d, e]`
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// World coordinate of a (fractional) pixel position
    pub fn apply(&self, col: f64, row: f64) -> Coord<f64> {
        Coord {
            x: self.a * col + self.b * row + self.c,
            y: self.d * col + self.e * row + self.f,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Inverse transform (world to pixel), if the transform is invertible
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Some(Affine::new(
            ia,
            ib,
            -(ia * self.c + ib * self.f),
            id,
            ie,
            -(id * self.c + ie * self.f),
        ))
    }

    /// Pixel (row, col) containing a world coordinate, flooring toward the origin
    pub fn index(&self, x: f64, y: f64) -> Option<(i64, i64)> {
        let inv = self.inverse()?;
        let pixel = inv.apply(x, y);
        let col = (pixel.x + INDEX_EPSILON).floor();
        let row = (pixel.y + INDEX_EPSILON).floor();
        if !col.is_finite() || !row.is_finite() {
            return None;
        }
        Some((row as i64, col as i64))
    }

    /// Transform of a window whose top-left pixel is (col_off, row_off)
    pub fn translated(&self, col_off: i64, row_off: i64) -> Affine {
        let origin = self.apply(col_off as f64, row_off as f64);
        Affine::new(self.a, self.b, origin.x, self.d, self.e, origin.y)
    }

    /// Transform with pixels `sx` times wider and `sy` times taller
    pub fn scaled(&self, sx: f64, sy: f64) -> Affine {
        Affine::new(self.a * sx, self.b * sy, self.c, self.d * sx, self.e * sy, self.f)
    }

    /// Ground size of one pixel along columns and rows
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.a.hypot(self.d), self.b.hypot(self.e))
    }

    /// True when the grid is axis-aligned (no rotation or shear)
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Ground footprint of a `width` x `height` grid under this transform
    pub fn bounds(&self, width: usize, height: usize) -> Rect<f64> {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width as f64, 0.0),
            self.apply(0.0, height as f64),
            self.apply(width as f64, height as f64),
        ];
        let min_x = corners.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|c| c.y).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max);
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }
}

/// Rectangular pixel window; offsets may be negative or exceed the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: i64,
    pub row_off: i64,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn new(col_off: i64, row_off: i64, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    /// Intersection with a `grid_width` x `grid_height` grid anchored at (0, 0)
    pub fn clip_to(&self, grid_width: usize, grid_height: usize) -> Option<PixelWindow> {
        let col_start = self.col_off.max(0);
        let row_start = self.row_off.max(0);
        let col_end = (self.col_off + self.width as i64).min(grid_width as i64);
        let row_end = (self.row_off + self.height as i64).min(grid_height as i64);

        if col_end <= col_start || row_end <= row_start {
            return None;
        }

        Some(PixelWindow::new(
            col_start,
            row_start,
            (col_end - col_start) as usize,
            (row_end - row_start) as usize,
        ))
    }

    /// True if the window lies completely inside the grid
    pub fn is_within(&self, grid_width: usize, grid_height: usize) -> bool {
        self.col_off >= 0
            && self.row_off >= 0
            && self.col_off + self.width as i64 <= grid_width as i64
            && self.row_off + self.height as i64 <= grid_height as i64
    }

    /// Offset (col, row) of `inner` relative to this window's origin
    pub fn offset_of(&self, inner: &PixelWindow) -> (usize, usize) {
        (
            (inner.col_off - self.col_off).max(0) as usize,
            (inner.row_off - self.row_off).max(0) as usize,
        )
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Native pixel grid of an opened raster source at one resolution level
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub transform: Affine,
    pub crs: Crs,
}

impl RasterGrid {
    pub fn bounds(&self) -> Rect<f64> {
        self.transform.bounds(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lambert_grid() -> Affine {
        Affine::north_up(100_000.0, 400_000.0, 0.8, 0.8)
    }

    #[test]
    fn test_index_floors_toward_origin() {
        let t = lambert_grid();
        assert_eq!(t.index(100_000.0, 400_000.0), Some((0, 0)));
        assert_eq!(t.index(100_000.79, 399_999.21), Some((0, 0)));
        assert_eq!(t.index(100_000.8, 399_999.2), Some((1, 1)));
        assert_eq!(t.index(99_999.9, 400_000.1), Some((-1, -1)));
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Affine::new(0.5, 0.1, 10.0, 0.2, -0.5, 20.0);
        let inv = t.inverse().unwrap();
        let world = t.apply(3.0, 7.0);
        let pixel = inv.apply(world.x, world.y);
        assert!((pixel.x - 3.0).abs() < 1e-9);
        assert!((pixel.y - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_translated_matches_window_origin() {
        let t = lambert_grid();
        let w = t.translated(10, 20);
        assert_eq!(w.c, 100_008.0);
        assert_eq!(w.f, 399_984.0);
        assert_eq!(w.a, t.a);
        assert_eq!(w.e, t.e);
    }

    #[test]
    fn test_gdal_roundtrip_and_scaling() {
        let t = lambert_grid();
        assert_eq!(Affine::from_gdal(t.to_gdal()), t);
        let coarse = t.scaled(2.0, 2.0);
        assert_eq!(coarse.pixel_size(), (1.6, 1.6));
        assert_eq!(coarse.c, t.c);
    }

    #[test]
    fn test_bounds() {
        let t = Affine::north_up(0.0, 10.0, 1.0, 1.0);
        let b = t.bounds(4, 10);
        assert_eq!(b.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(b.max(), Coord { x: 4.0, y: 10.0 });
    }

    #[test]
    fn test_window_clip() {
        let w = PixelWindow::new(-5, 90, 20, 20);
        let clipped = w.clip_to(100, 100).unwrap();
        assert_eq!(clipped, PixelWindow::new(0, 90, 15, 10));
        assert_eq!(w.offset_of(&clipped), (5, 0));
        assert!(!w.is_within(100, 100));
        assert!(PixelWindow::new(0, 0, 100, 100).is_within(100, 100));
        assert!(PixelWindow::new(200, 0, 10, 10).clip_to(100, 100).is_none());
    }
}
