use geo::{BoundingRect, Coord, Intersects, Point, Rect};
use orthochip_core::models::{CatalogEntry, Crs};
use orthochip_core::ports::Catalog;
use rstar::{RTree, RTreeObject, AABB};

/// Envelope of one catalog entry, pointing back to its load position
#[derive(Debug, Clone, PartialEq)]
struct IndexedEntry {
    position: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Immutable, shareable catalog snapshot with an R-tree over coverage envelopes
pub struct CatalogIndex {
    crs: Crs,
    entries: Vec<CatalogEntry>,
    tree: RTree<IndexedEntry>,
}

impl CatalogIndex {
    /// Build the index; entries keep their load order for tie-breaking
    pub fn new(crs: Crs, entries: Vec<CatalogEntry>) -> Self {
        let indexed: Vec<IndexedEntry> = entries
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let rect = entry.coverage.bounding_rect()?;
                Some(IndexedEntry {
                    position,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        if indexed.len() < entries.len() {
            tracing::warn!(
                skipped = entries.len() - indexed.len(),
                "Catalog entries with empty coverage are not indexed"
            );
        }

        Self { crs, entries, tree: RTree::bulk_load(indexed) }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Union of all coverage envelopes
    pub fn bounds(&self) -> Option<Rect<f64>> {
        if self.tree.size() == 0 {
            return None;
        }
        let envelope = self.tree.root().envelope();
        let (lower, upper) = (envelope.lower(), envelope.upper());
        Some(Rect::new(Coord { x: lower[0], y: lower[1] }, Coord { x: upper[0], y: upper[1] }))
    }
}

impl Catalog for CatalogIndex {
    fn crs(&self) -> &Crs {
        &self.crs
    }

    fn point_intersect(&self, point: Coord<f64>) -> Vec<&CatalogEntry> {
        let query = AABB::from_point([point.x, point.y]);
        let mut positions: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|indexed| indexed.position)
            .collect();
        positions.sort_unstable();

        let point = Point::from(point);
        positions
            .into_iter()
            .map(|position| &self.entries[position])
            .filter(|entry| entry.coverage.intersects(&point))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use geo::{polygon, MultiPolygon};

    fn square(id: &str, x0: f64, y0: f64, size: f64) -> CatalogEntry {
        CatalogEntry {
            sheet_id: id.to_string(),
            coverage: MultiPolygon::new(vec![polygon![
                (x: x0, y: y0),
                (x: x0 + size, y: y0),
                (x: x0 + size, y: y0 + size),
                (x: x0, y: y0 + size),
            ]]),
            rgb_locator: format!("{}_rgb.tif", id),
            nir_locator: None,
            vector_locator: format!("{}.geojson", id),
            valid_from: NaiveDate::from_ymd_opt(2022, 6, 1).unwrap(),
        }
    }

    #[test]
    fn test_point_intersect() {
        let index = CatalogIndex::new(
            Crs::austria_lambert(),
            vec![square("a", 0.0, 0.0, 10.0), square("b", 10.0, 0.0, 10.0)],
        );

        let hits = index.point_intersect(Coord { x: 15.0, y: 5.0 });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sheet_id, "b");
        assert!(index.point_intersect(Coord { x: 25.0, y: 5.0 }).is_empty());
    }

    #[test]
    fn test_overlap_keeps_load_order() {
        let index = CatalogIndex::new(
            Crs::austria_lambert(),
            vec![square("second", 5.0, 0.0, 10.0), square("first", 0.0, 0.0, 10.0)],
        );
        let hits = index.point_intersect(Coord { x: 7.0, y: 5.0 });
        let ids: Vec<_> = hits.iter().map(|e| e.sheet_id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first"]);
    }

    #[test]
    fn test_bounds() {
        let index = CatalogIndex::new(
            Crs::austria_lambert(),
            vec![square("a", 0.0, 0.0, 10.0), square("b", 10.0, -5.0, 10.0)],
        );
        let bounds = index.bounds().unwrap();
        assert_eq!(bounds.min(), Coord { x: 0.0, y: -5.0 });
        assert_eq!(bounds.max(), Coord { x: 20.0, y: 10.0 });
        assert_eq!(index.len(), 2);
    }
}
