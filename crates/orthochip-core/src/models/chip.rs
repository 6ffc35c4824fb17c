//! Extracted image and mask chips.

use super::class_code::ClassCode;
use super::geometry::Crs;
use super::grid::Affine;
use geo::{Geometry, Rect};
use ndarray::{Array2, Array3};
use std::collections::BTreeMap;

/// Multi-band imagery chip laid out as (bands, rows, cols)
#[derive(Debug, Clone, PartialEq)]
pub struct ImageChip {
    pub data: Array3<u8>,
    pub transform: Affine,
    pub crs: Crs,
    pub nodata: u8,
    /// Part of the chip lies outside the source and was filled with `nodata`
    pub nodata_present: bool,
}

impl ImageChip {
    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.transform.bounds(self.width(), self.height())
    }
}

/// Single-band binary mask on the same grid as an [`ImageChip`]
#[derive(Debug, Clone, PartialEq)]
pub struct MaskChip {
    pub data: Array2<u8>,
    pub transform: Affine,
    pub crs: Crs,
    /// Pixels covered by each requested class before classes are merged
    pub class_pixels: BTreeMap<ClassCode, u64>,
    pub feature_count: usize,
}

impl MaskChip {
    /// Empty mask of the given size
    pub fn background(height: usize, width: usize, transform: Affine, crs: Crs) -> Self {
        Self {
            data: Array2::zeros((height, width)),
            transform,
            crs,
            class_pixels: BTreeMap::new(),
            feature_count: 0,
        }
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn pixel_count(&self) -> u64 {
        (self.height() * self.width()) as u64
    }

    pub fn foreground_pixels(&self) -> u64 {
        self.data.iter().filter(|&&v| v != 0).count() as u64
    }
}

/// A cadastre feature as returned by a vector source
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFeature {
    pub geometry: Geometry<f64>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl VectorFeature {
    /// Class code read from the named attribute, if it belongs to the vocabulary
    pub fn class_code(&self, attribute: &str) -> Option<ClassCode> {
        self.properties.get(attribute).and_then(ClassCode::from_attribute)
    }
}

/// Filtered features in the chip CRS, kept before rasterization
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VectorExtract {
    pub crs: Crs,
    pub features: Vec<(ClassCode, Geometry<f64>)>,
}

impl VectorExtract {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;
    use serde_json::json;

    #[test]
    fn test_background_mask() {
        let mask = MaskChip::background(4, 6, Affine::north_up(0.0, 4.0, 1.0, 1.0), Crs::austria_lambert());
        assert_eq!((mask.height(), mask.width()), (4, 6));
        assert_eq!(mask.pixel_count(), 24);
        assert_eq!(mask.foreground_pixels(), 0);
    }

    #[test]
    fn test_image_chip_dims() {
        let chip = ImageChip {
            data: Array3::zeros((4, 3, 5)),
            transform: Affine::north_up(100.0, 200.0, 2.0, 2.0),
            crs: Crs::austria_lambert(),
            nodata: 0,
            nodata_present: false,
        };
        assert_eq!((chip.bands(), chip.height(), chip.width()), (4, 3, 5));
        let bounds = chip.bounds();
        assert_eq!(bounds.min().x, 100.0);
        assert_eq!(bounds.max().x, 110.0);
        assert_eq!(bounds.min().y, 194.0);
    }

    #[test]
    fn test_feature_class_code() {
        let mut properties = serde_json::Map::new();
        properties.insert("NS".to_string(), json!("41"));
        let feature = VectorFeature { geometry: Geometry::Point(point!(x: 0.0, y: 0.0)), properties };
        assert_eq!(feature.class_code("NS"), Some(ClassCode::Ns41));
        assert_eq!(feature.class_code("OTHER"), None);
    }
}
