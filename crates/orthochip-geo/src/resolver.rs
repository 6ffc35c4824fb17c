//! Coordinate Resolver: query point to projected point and catalog sheet.

use geo::Coord;
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{CatalogEntry, Crs, GeoPoint};
use orthochip_core::ports::{Catalog, PointTransformer};
use std::sync::Arc;

/// Projects geographic query points into the catalog CRS and finds their sheet
#[derive(Clone)]
pub struct CoordinateResolver {
    catalog: Arc<dyn Catalog>,
    transformer: Arc<dyn PointTransformer>,
    geographic: Crs,
}

impl CoordinateResolver {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        transformer: Arc<dyn PointTransformer>,
        geographic: Crs,
    ) -> Self {
        Self { catalog, transformer, geographic }
    }

    pub fn catalog_crs(&self) -> &Crs {
        self.catalog.crs()
    }

    /// Reference system of query points
    pub fn geographic_crs(&self) -> &Crs {
        &self.geographic
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn transformer(&self) -> &dyn PointTransformer {
        self.transformer.as_ref()
    }

    /// Geographic point to the catalog CRS
    pub fn project(&self, point: GeoPoint) -> Result<Coord<f64>> {
        self.transformer.transform(&self.geographic, self.catalog.crs(), point.to_coord())
    }

    /// Catalog sheet whose coverage contains a projected point
    ///
    /// No match is [`OrthochipError::OutOfCoverage`]. Several matches resolve to
    /// the first in catalog load order.
    pub fn locate(&self, projected: Coord<f64>) -> Result<&CatalogEntry> {
        let matches = self.catalog.point_intersect(projected);
        match matches.as_slice() {
            [] => Err(OrthochipError::OutOfCoverage { x: projected.x, y: projected.y }),
            [entry] => Ok(*entry),
            [first, ..] => {
                let candidates: Vec<&str> = matches.iter().map(|e| e.sheet_id.as_str()).collect();
                tracing::warn!(
                    x = projected.x,
                    y = projected.y,
                    ?candidates,
                    chosen = %first.sheet_id,
                    "Point intersects several catalog sheets, using the first"
                );
                Ok(*first)
            }
        }
    }

    /// Project and locate in one step
    pub fn resolve(&self, point: GeoPoint) -> Result<(Coord<f64>, &CatalogEntry)> {
        let projected = self.project(point)?;
        let entry = self.locate(projected)?;
        tracing::debug!(
            lon = point.lon,
            lat = point.lat,
            x = projected.x,
            y = projected.y,
            sheet = %entry.sheet_id,
            "Resolved query point"
        );
        Ok((projected, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CatalogIndex;
    use chrono::NaiveDate;
    use geo::{polygon, MultiPolygon};

    /// Treats lon/lat as meters scaled by 1000
    struct Scale;

    impl PointTransformer for Scale {
        fn transform(&self, _from: &Crs, _to: &Crs, point: Coord<f64>) -> Result<Coord<f64>> {
            Ok(Coord { x: point.x * 1000.0, y: point.y * 1000.0 })
        }
    }

    fn sheet(id: &str, x0: f64) -> CatalogEntry {
        CatalogEntry {
            sheet_id: id.to_string(),
            coverage: MultiPolygon::new(vec![polygon![
                (x: x0, y: 0.0),
                (x: x0 + 1000.0, y: 0.0),
                (x: x0 + 1000.0, y: 1000.0),
                (x: x0, y: 1000.0),
            ]]),
            rgb_locator: "rgb.tif".to_string(),
            nir_locator: None,
            vector_locator: "nfl.geojson".to_string(),
            valid_from: NaiveDate::from_ymd_opt(2020, 5, 1).unwrap(),
        }
    }

    fn resolver(entries: Vec<CatalogEntry>) -> CoordinateResolver {
        CoordinateResolver::new(
            Arc::new(CatalogIndex::new(Crs::austria_lambert(), entries)),
            Arc::new(Scale),
            Crs::wgs84(),
        )
    }

    #[test]
    fn test_resolve_inside_coverage() {
        let resolver = resolver(vec![sheet("a", 0.0), sheet("b", 1000.0)]);
        let (projected, entry) = resolver.resolve(GeoPoint::new(1.5, 0.5)).unwrap();
        assert_eq!(projected, Coord { x: 1500.0, y: 500.0 });
        assert_eq!(entry.sheet_id, "b");
    }

    #[test]
    fn test_out_of_coverage_is_typed() {
        let resolver = resolver(vec![sheet("a", 0.0)]);
        let err = resolver.resolve(GeoPoint::new(5.0, 5.0)).unwrap_err();
        assert!(err.is_out_of_coverage());
        assert!(err.is_tile_level());
    }

    #[test]
    fn test_multiple_matches_pick_first() {
        let resolver = resolver(vec![sheet("first", 0.0), sheet("second", 500.0)]);
        let entry = resolver.locate(Coord { x: 700.0, y: 10.0 }).unwrap();
        assert_eq!(entry.sheet_id, "first");
    }
}
