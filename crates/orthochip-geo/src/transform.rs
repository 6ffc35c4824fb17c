//! CRS transformation backed by PROJ

use geo::{Coord, Geometry, MapCoords, Rect};
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::Crs;
use orthochip_core::ports::PointTransformer;
use proj::Proj;
use std::cell::RefCell;
use std::collections::HashMap;

/// Samples per bbox edge when transforming a rectangle
const EDGE_SAMPLES: usize = 21;

thread_local! {
    // PROJ contexts are not shareable across threads; keep one set per worker
    static PROJ_CACHE: RefCell<HashMap<(u32, u32), Proj>> = RefCell::new(HashMap::new());
}

/// Check if two CRS are the same
pub fn crs_match(crs1: &Crs, crs2: &Crs) -> bool {
    crs1.epsg == crs2.epsg
}

/// Point transformer using PROJ EPSG definitions
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjTransformer;

impl ProjTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl PointTransformer for ProjTransformer {
    fn transform(&self, from: &Crs, to: &Crs, point: Coord<f64>) -> Result<Coord<f64>> {
        if crs_match(from, to) {
            return Ok(point);
        }

        let projection_error = |reason: String| OrthochipError::Projection {
            from: from.to_string(),
            to: to.to_string(),
            reason,
        };

        PROJ_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            let key = (from.epsg, to.epsg);
            if !cache.contains_key(&key) {
                let proj = Proj::new_known_crs(&from.to_string(), &to.to_string(), None)
                    .map_err(|e| projection_error(format!("Failed to create projection: {}", e)))?;
                cache.insert(key, proj);
            }
            let proj = cache
                .get(&key)
                .ok_or_else(|| projection_error("projection cache miss".to_string()))?;

            let (x, y) = proj
                .convert((point.x, point.y))
                .map_err(|e| projection_error(format!("Projection failed: {}", e)))?;
            if !x.is_finite() || !y.is_finite() {
                return Err(projection_error(format!(
                    "({}, {}) has no finite image",
                    point.x, point.y
                )));
            }
            Ok(Coord { x, y })
        })
    }
}

/// Reproject a geometry from one CRS to another
pub fn reproject_geometry(
    geometry: &Geometry<f64>,
    from_crs: &Crs,
    to_crs: &Crs,
    transformer: &dyn PointTransformer,
) -> Result<Geometry<f64>> {
    // If CRS are the same, no transformation needed
    if crs_match(from_crs, to_crs) {
        return Ok(geometry.clone());
    }

    geometry.try_map_coords(|coord| transformer.transform(from_crs, to_crs, coord))
}

/// Bounding box of a rectangle after transformation, sampled along its edges
pub fn transform_rect(
    rect: &Rect<f64>,
    from_crs: &Crs,
    to_crs: &Crs,
    transformer: &dyn PointTransformer,
) -> Result<Rect<f64>> {
    if crs_match(from_crs, to_crs) {
        return Ok(*rect);
    }

    let (min, max) = (rect.min(), rect.max());
    let mut lo = Coord { x: f64::INFINITY, y: f64::INFINITY };
    let mut hi = Coord { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };

    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
        let x = min.x + t * (max.x - min.x);
        let y = min.y + t * (max.y - min.y);
        let samples = [
            Coord { x, y: min.y },
            Coord { x, y: max.y },
            Coord { x: min.x, y },
            Coord { x: max.x, y },
        ];
        for sample in samples {
            let c = transformer.transform(from_crs, to_crs, sample)?;
            lo.x = lo.x.min(c.x);
            lo.y = lo.y.min(c.y);
            hi.x = hi.x.max(c.x);
            hi.y = hi.y.max(c.y);
        }
    }

    Ok(Rect::new(lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    /// Shifts coordinates by a fixed offset; stands in for PROJ in unit tests
    struct Shift(f64, f64);

    impl PointTransformer for Shift {
        fn transform(&self, _from: &Crs, _to: &Crs, point: Coord<f64>) -> Result<Coord<f64>> {
            Ok(Coord { x: point.x + self.0, y: point.y + self.1 })
        }
    }

    #[test]
    fn test_same_crs_is_identity() {
        let p = Coord { x: 16.37, y: 48.2 };
        let out = ProjTransformer::new().transform(&Crs::wgs84(), &Crs::wgs84(), p).unwrap();
        assert_eq!(out, p);
    }

    #[test]
    fn test_reproject_polygon() {
        let poly: Polygon<f64> = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let out = reproject_geometry(
            &Geometry::Polygon(poly),
            &Crs::wgs84(),
            &Crs::austria_lambert(),
            &Shift(10.0, 20.0),
        )
        .unwrap();

        match out {
            Geometry::Polygon(p) => assert_eq!(p.exterior().0[1], Coord { x: 11.0, y: 20.0 }),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_transform_rect() {
        let rect = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 2.0, y: 3.0 });
        let out = transform_rect(&rect, &Crs::wgs84(), &Crs::austria_lambert(), &Shift(1.0, -1.0))
            .unwrap();
        assert_eq!(out.min(), Coord { x: 1.0, y: -1.0 });
        assert_eq!(out.max(), Coord { x: 3.0, y: 2.0 });
    }

    #[test]
    #[ignore = "requires PROJ data"]
    fn test_wgs84_to_austria_lambert() {
        let vienna = ProjTransformer::new()
            .transform(&Crs::wgs84(), &Crs::austria_lambert(), Coord { x: 16.3725, y: 48.2083 })
            .unwrap();
        assert!((vienna.x - 625_000.0).abs() < 10_000.0);
        assert!((vienna.y - 483_000.0).abs() < 10_000.0);
    }
}
