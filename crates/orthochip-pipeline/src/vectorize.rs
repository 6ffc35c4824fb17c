//! Vector Rasterizer: cadastre features burned onto the chip grid.

use geo::Geometry;
use ndarray::{Array2, Zip};
use orthochip_core::error::Result;
use orthochip_core::models::{
    CatalogEntry, ChipSpec, ClassCode, Crs, MaskChip, VectorExtract, VectorFeature,
};
use orthochip_core::ports::{PointTransformer, VectorSource};
use orthochip_geo::{burn_geometry, reproject_geometry, transform_rect, ExtractionWindow};
use std::collections::BTreeMap;

/// Result of the vector step for one tile
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRasterization {
    pub mask: MaskChip,
    /// Filtered features in the chip CRS, when requested
    pub extract: Option<VectorExtract>,
}

/// Filters cadastre features and rasterizes them onto an imagery chip's grid
pub struct VectorRasterizer<'a> {
    source: &'a dyn VectorSource,
    transformer: &'a dyn PointTransformer,
    class_attribute: &'a str,
}

impl<'a> VectorRasterizer<'a> {
    pub fn new(
        source: &'a dyn VectorSource,
        transformer: &'a dyn PointTransformer,
        class_attribute: &'a str,
    ) -> Self {
        Self { source, transformer, class_attribute }
    }

    /// Build the binary mask for `window` in `chip_crs`
    ///
    /// Requested classes are merged into one foreground value; per-class pixel
    /// counts are kept before merging.
    pub fn rasterize(
        &self,
        entry: &CatalogEntry,
        window: &ExtractionWindow,
        chip_crs: &Crs,
        spec: &ChipSpec,
    ) -> Result<VectorRasterization> {
        let locator = entry.vector_locator();
        let mut handle = self.source.open(&locator)?;
        let sheet_crs = handle.crs().clone();

        let bbox = transform_rect(&window.bounds(), chip_crs, &sheet_crs, self.transformer)?;
        let classes = spec.classes();
        let attribute = self.class_attribute;
        let wanted = |feature: &VectorFeature| {
            feature.class_code(attribute).is_some_and(|code| classes.contains(&code))
        };
        let features = handle.filter(&bbox, &wanted)?;

        tracing::debug!(
            locator = %locator,
            sheet_crs = %sheet_crs,
            features = features.len(),
            "Filtered cadastre features"
        );

        let mut by_class: BTreeMap<ClassCode, Vec<Geometry<f64>>> = BTreeMap::new();
        for feature in &features {
            let Some(code) = feature.class_code(attribute) else { continue };
            let geometry =
                reproject_geometry(&feature.geometry, &sheet_crs, chip_crs, self.transformer)?;
            by_class.entry(code).or_default().push(geometry);
        }

        let mask = burn_classes(&by_class, window, chip_crs, features.len())?;

        let extract = spec.write_vector_extract().then(|| VectorExtract {
            crs: chip_crs.clone(),
            features: by_class
                .iter()
                .flat_map(|(&code, geometries)| geometries.iter().map(move |g| (code, g.clone())))
                .collect(),
        });

        Ok(VectorRasterization { mask, extract })
    }
}

/// Burn each class on its own layer, then merge the layers into one mask
fn burn_classes(
    by_class: &BTreeMap<ClassCode, Vec<Geometry<f64>>>,
    window: &ExtractionWindow,
    chip_crs: &Crs,
    feature_count: usize,
) -> Result<MaskChip> {
    let (height, width) = (window.out_height, window.out_width);
    let mut mask = MaskChip::background(height, width, window.transform, chip_crs.clone());
    mask.feature_count = feature_count;

    let mut layer = Array2::<u8>::zeros((height, width));
    for (&code, geometries) in by_class {
        layer.fill(0);
        for geometry in geometries {
            burn_geometry(&mut layer, &window.transform, geometry, 1)?;
        }
        let covered = layer.iter().filter(|&&v| v != 0).count() as u64;
        mask.class_pixels.insert(code, covered);
        Zip::from(&mut mask.data).and(&layer).for_each(|m, &l| *m |= l);
    }

    Ok(mask)
}
