//! Catalog entries linking coverage polygons to imagery and cadastre sources.

use super::request::BandGroup;
use chrono::{Datelike, NaiveDate};
use geo::MultiPolygon;

/// Placeholder in a vector locator replaced by the cadastre epoch (YYYYMMDD)
pub const EPOCH_PLACEHOLDER: &str = "{epoch}";

/// One sheet of the pre-built catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub sheet_id: String,
    /// Coverage in the catalog CRS; neighbours do not overlap
    pub coverage: MultiPolygon<f64>,
    pub rgb_locator: String,
    pub nir_locator: Option<String>,
    pub vector_locator: String,
    /// Acquisition date of the imagery
    pub valid_from: NaiveDate,
}

impl CatalogEntry {
    /// Locator of the imagery source holding a band group
    pub fn raster_locator(&self, group: BandGroup) -> Option<&str> {
        match group {
            BandGroup::Rgb => Some(self.rgb_locator.as_str()),
            BandGroup::Nir => self.nir_locator.as_deref(),
        }
    }

    /// Cadastre release matching the imagery date
    pub fn vector_epoch(&self) -> NaiveDate {
        cadastre_epoch_before(self.valid_from)
    }

    /// Vector locator with the epoch placeholder expanded
    pub fn vector_locator(&self) -> String {
        let epoch = self.vector_epoch().format("%Y%m%d").to_string();
        self.vector_locator.replace(EPOCH_PLACEHOLDER, &epoch)
    }
}

/// Most recent cadastre release on or before `date`
///
/// Releases happen on 1 April and 1 October.
pub fn cadastre_epoch_before(date: NaiveDate) -> NaiveDate {
    let (year, month) = match date.month() {
        1..=3 => (date.year() - 1, 10),
        4..=9 => (date.year(), 4),
        _ => (date.year(), 10),
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry() -> CatalogEntry {
        CatalogEntry {
            sheet_id: "sheet".to_string(),
            coverage: MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 0.0, y: 10.0),
            ]]),
            rgb_locator: "rgb.tif".to_string(),
            nir_locator: None,
            vector_locator: "kataster_{epoch}.geojson".to_string(),
            valid_from: ymd(2021, 6, 15),
        }
    }

    #[test]
    fn test_epoch_boundaries() {
        assert_eq!(cadastre_epoch_before(ymd(2021, 3, 31)), ymd(2020, 10, 1));
        assert_eq!(cadastre_epoch_before(ymd(2021, 4, 1)), ymd(2021, 4, 1));
        assert_eq!(cadastre_epoch_before(ymd(2021, 9, 30)), ymd(2021, 4, 1));
        assert_eq!(cadastre_epoch_before(ymd(2021, 10, 1)), ymd(2021, 10, 1));
        assert_eq!(cadastre_epoch_before(ymd(2021, 12, 31)), ymd(2021, 10, 1));
    }

    #[test]
    fn test_vector_locator_expansion() {
        assert_eq!(entry().vector_locator(), "kataster_20210401.geojson");
    }

    #[test]
    fn test_raster_locator_by_group() {
        let mut entry = entry();
        assert_eq!(entry.raster_locator(BandGroup::Rgb), Some("rgb.tif"));
        assert_eq!(entry.raster_locator(BandGroup::Nir), None);
        entry.nir_locator = Some("nir.tif".to_string());
        assert_eq!(entry.raster_locator(BandGroup::Nir), Some("nir.tif"));
    }
}
