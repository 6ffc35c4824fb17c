//! Burning vector geometries onto a pixel grid.
//!
//! Polygons are filled with a scanline pass at pixel centres (a pixel is
//! burned when its centre lies inside the polygon, even-odd rule). Polygons
//! too small to contain any pixel centre fall back to burning the pixels
//! their outline passes through, so a feature on the grid never vanishes.
//! Lines burn every pixel they cross; points burn the pixel containing them.

use geo::{Coord, Geometry, LineString, Polygon};
use ndarray::Array2;
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::Affine;

/// Rasterize shapes onto a new `height` x `width` grid (background 0)
pub fn rasterize<'a>(
    shapes: impl IntoIterator<Item = &'a Geometry<f64>>,
    height: usize,
    width: usize,
    transform: &Affine,
    value: u8,
) -> Result<Array2<u8>> {
    let mut target = Array2::zeros((height, width));
    for shape in shapes {
        burn_geometry(&mut target, transform, shape, value)?;
    }
    Ok(target)
}

/// Burn one geometry into `target`; returns the number of pixels written
pub fn burn_geometry(
    target: &mut Array2<u8>,
    transform: &Affine,
    geometry: &Geometry<f64>,
    value: u8,
) -> Result<usize> {
    let inverse = transform.inverse().ok_or_else(|| {
        OrthochipError::validation("transform", "output transform is not invertible")
    })?;
    let mut burner = Burner { target, inverse, value, written: 0 };
    burner.geometry(geometry);
    Ok(burner.written)
}

struct Burner<'a> {
    target: &'a mut Array2<u8>,
    inverse: Affine,
    value: u8,
    written: usize,
}

impl Burner<'_> {
    fn to_pixel(&self, c: Coord<f64>) -> Coord<f64> {
        self.inverse.apply(c.x, c.y)
    }

    fn geometry(&mut self, geometry: &Geometry<f64>) {
        match geometry {
            Geometry::Point(p) => self.point(p.0),
            Geometry::MultiPoint(mp) => mp.iter().for_each(|p| self.point(p.0)),
            Geometry::Line(l) => self.segment(self.to_pixel(l.start), self.to_pixel(l.end)),
            Geometry::LineString(ls) => self.line_string(ls),
            Geometry::MultiLineString(mls) => mls.iter().for_each(|ls| self.line_string(ls)),
            Geometry::Polygon(poly) => self.polygon(poly),
            Geometry::MultiPolygon(mp) => mp.iter().for_each(|poly| self.polygon(poly)),
            Geometry::Rect(r) => self.polygon(&r.to_polygon()),
            Geometry::Triangle(t) => self.polygon(&t.to_polygon()),
            Geometry::GeometryCollection(gc) => gc.iter().for_each(|g| self.geometry(g)),
        }
    }

    fn set(&mut self, row: i64, col: i64) {
        let (height, width) = self.target.dim();
        if row < 0 || col < 0 || row >= height as i64 || col >= width as i64 {
            return;
        }
        self.target[[row as usize, col as usize]] = self.value;
        self.written += 1;
    }

    fn point(&mut self, c: Coord<f64>) {
        let p = self.to_pixel(c);
        self.set(p.y.floor() as i64, p.x.floor() as i64);
    }

    fn line_string(&mut self, ls: &LineString<f64>) {
        let pixels: Vec<Coord<f64>> = ls.0.iter().map(|&c| self.to_pixel(c)).collect();
        if let [only] = pixels.as_slice() {
            self.set(only.y.floor() as i64, only.x.floor() as i64);
        }
        for pair in pixels.windows(2) {
            self.segment(pair[0], pair[1]);
        }
    }

    /// Walk a segment in half-pixel steps, burning each visited pixel
    fn segment(&mut self, a: Coord<f64>, b: Coord<f64>) {
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let steps = ((dx.abs().max(dy.abs()) * 2.0).ceil() as usize).max(1);
        let mut last = None;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let cell = ((a.y + t * dy).floor() as i64, (a.x + t * dx).floor() as i64);
            if last != Some(cell) {
                self.set(cell.0, cell.1);
                last = Some(cell);
            }
        }
    }

    fn polygon(&mut self, poly: &Polygon<f64>) {
        let rings: Vec<Vec<Coord<f64>>> = std::iter::once(poly.exterior())
            .chain(poly.interiors())
            .map(|ring| self.closed_ring(ring))
            .filter(|ring| ring.len() >= 4)
            .collect();
        if rings.is_empty() {
            return;
        }

        if self.fill(&rings) == 0 {
            if let Some(exterior) = rings.first() {
                for pair in exterior.windows(2) {
                    self.segment(pair[0], pair[1]);
                }
            }
        }
    }

    fn closed_ring(&self, ring: &LineString<f64>) -> Vec<Coord<f64>> {
        let mut pixels: Vec<Coord<f64>> = ring.0.iter().map(|&c| self.to_pixel(c)).collect();
        if let (Some(&first), Some(&last)) = (pixels.first(), pixels.last()) {
            if first != last {
                pixels.push(first);
            }
        }
        pixels
    }

    /// Even-odd scanline fill at pixel centres; returns pixels burned
    fn fill(&mut self, rings: &[Vec<Coord<f64>>]) -> usize {
        let (height, width) = self.target.dim();
        let (min_y, max_y) = rings
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| (lo.min(c.y), hi.max(c.y)));

        let row_start = (min_y - 0.5).ceil().max(0.0) as usize;
        let row_end = ((max_y - 0.5).ceil().max(0.0) as usize).min(height);

        let before = self.written;
        let mut crossings: Vec<f64> = Vec::new();
        for row in row_start..row_end {
            let yc = row as f64 + 0.5;
            crossings.clear();
            for ring in rings {
                for edge in ring.windows(2) {
                    let (a, b) = (edge[0], edge[1]);
                    if (a.y <= yc) != (b.y <= yc) {
                        let t = (yc - a.y) / (b.y - a.y);
                        crossings.push(a.x + t * (b.x - a.x));
                    }
                }
            }
            crossings.sort_by(|l, r| l.total_cmp(r));

            for span in crossings.chunks_exact(2) {
                let col_start = (span[0] - 0.5).ceil().max(0.0) as usize;
                let col_end = ((span[1] - 0.5).ceil().max(0.0) as usize).min(width);
                for col in col_start..col_end {
                    self.target[[row, col]] = self.value;
                    self.written += 1;
                }
            }
        }
        self.written - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon, Rect};
    use proptest::prelude::*;

    /// 10 x 10 grid of 1 m pixels with its origin at (0, 10)
    fn grid() -> Affine {
        Affine::north_up(0.0, 10.0, 1.0, 1.0)
    }

    fn count(mask: &Array2<u8>) -> usize {
        mask.iter().filter(|&&v| v == 1).count()
    }

    #[test]
    fn test_aligned_square_burns_exact_pixels() {
        let square = Geometry::Polygon(polygon![
            (x: 2.0, y: 2.0),
            (x: 5.0, y: 2.0),
            (x: 5.0, y: 6.0),
            (x: 2.0, y: 6.0),
        ]);
        let mask = rasterize([&square], 10, 10, &grid(), 1).unwrap();
        assert_eq!(count(&mask), 12);
        // Row 4 covers y in [5, 6), columns 2..5
        assert_eq!(mask[[4, 2]], 1);
        assert_eq!(mask[[4, 5]], 0);
        assert_eq!(mask[[3, 2]], 0);
    }

    #[test]
    fn test_hole_is_left_empty() {
        let donut = Geometry::Polygon(Polygon::new(
            line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            vec![line_string![(x: 4.0, y: 4.0), (x: 6.0, y: 4.0), (x: 6.0, y: 6.0), (x: 4.0, y: 6.0)]],
        ));
        let mask = rasterize([&donut], 10, 10, &grid(), 1).unwrap();
        assert_eq!(count(&mask), 96);
        assert_eq!(mask[[5, 5]], 0);
    }

    #[test]
    fn test_tiny_polygon_still_burns() {
        let sliver = Geometry::Polygon(polygon![
            (x: 3.1, y: 3.1),
            (x: 3.3, y: 3.1),
            (x: 3.3, y: 3.3),
        ]);
        let mask = rasterize([&sliver], 10, 10, &grid(), 1).unwrap();
        assert_eq!(count(&mask), 1);
        assert_eq!(mask[[6, 3]], 1);
    }

    #[test]
    fn test_outside_feature_burns_nothing() {
        let outside = Geometry::Polygon(polygon![
            (x: 20.0, y: 20.0),
            (x: 25.0, y: 20.0),
            (x: 25.0, y: 25.0),
        ]);
        let mask = rasterize([&outside], 10, 10, &grid(), 1).unwrap();
        assert_eq!(count(&mask), 0);
    }

    #[test]
    fn test_lines_and_points() {
        let line = Geometry::LineString(line_string![(x: 0.5, y: 9.5), (x: 9.5, y: 9.5)]);
        let pt = Geometry::Point(point!(x: 5.5, y: 0.5));
        let mask = rasterize([&line, &pt], 10, 10, &grid(), 1).unwrap();
        assert_eq!(mask.row(0).iter().filter(|&&v| v == 1).count(), 10);
        assert_eq!(mask[[9, 5]], 1);
        assert_eq!(count(&mask), 11);
    }

    #[test]
    fn test_partially_outside_polygon_is_clipped() {
        let rect = Geometry::Rect(Rect::new(Coord { x: -5.0, y: -5.0 }, Coord { x: 3.0, y: 3.0 }));
        let mask = rasterize([&rect], 10, 10, &grid(), 1).unwrap();
        assert_eq!(count(&mask), 9);
    }

    proptest! {
        #[test]
        fn prop_inside_feature_burns_and_outside_does_not(
            x in 0.0f64..9.0,
            y in 0.0f64..9.0,
            w in 0.05f64..1.0,
            h in 0.05f64..1.0,
        ) {
            let inside = Geometry::Rect(Rect::new(Coord { x, y }, Coord { x: x + w, y: y + h }));
            let outside = Geometry::Rect(Rect::new(
                Coord { x: x + 20.0, y },
                Coord { x: x + 20.0 + w, y: y + h },
            ));
            let mask = rasterize([&inside], 10, 10, &grid(), 1).unwrap();
            prop_assert!(count(&mask) >= 1);
            let mask = rasterize([&outside], 10, 10, &grid(), 1).unwrap();
            prop_assert_eq!(count(&mask), 0);
        }
    }
}
