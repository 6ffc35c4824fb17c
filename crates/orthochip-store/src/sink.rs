//! File-backed tile output

use crate::geotiff::GeoTiffWriter;
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{ImageChip, MaskChip, VectorExtract};
use orthochip_core::ports::TileSink;
use std::fs;
use std::path::{Path, PathBuf};

/// Attribute holding the class code in vector extracts
const EXTRACT_CLASS_PROPERTY: &str = "NS";

/// Write through `write` into a sibling temp file, then rename over `path`
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Writes chips and extracts into one output directory
#[derive(Debug, Clone)]
pub struct FileTileSink {
    outpath: PathBuf,
}

impl FileTileSink {
    /// The output directory must already exist
    pub fn new(outpath: impl Into<PathBuf>) -> Result<Self> {
        let outpath = outpath.into();
        if !outpath.is_dir() {
            return Err(OrthochipError::InvalidOutpath { path: outpath });
        }
        Ok(Self { outpath })
    }

    pub fn outpath(&self) -> &Path {
        &self.outpath
    }

    pub fn image_path(&self, id: &str) -> PathBuf {
        self.outpath.join(format!("input_{}.tif", id))
    }

    pub fn mask_path(&self, id: &str) -> PathBuf {
        self.outpath.join(format!("target_{}.tif", id))
    }

    pub fn extract_path(&self, id: &str) -> PathBuf {
        self.outpath.join(format!("target_{}.geojson", id))
    }
}

impl TileSink for FileTileSink {
    fn outputs_exist(&self, id: &str) -> bool {
        self.image_path(id).is_file() && self.mask_path(id).is_file()
    }

    fn write_image(&self, id: &str, chip: &ImageChip) -> Result<()> {
        let path = self.image_path(id);
        write_atomic(&path, |tmp| GeoTiffWriter::from_image(chip).write(tmp))?;
        tracing::debug!(id, path = %path.display(), "Wrote image chip");
        Ok(())
    }

    fn write_mask(&self, id: &str, mask: &MaskChip) -> Result<()> {
        let path = self.mask_path(id);
        write_atomic(&path, |tmp| GeoTiffWriter::from_mask(mask).write(tmp))?;
        tracing::debug!(id, path = %path.display(), "Wrote mask chip");
        Ok(())
    }

    fn write_vector_extract(&self, id: &str, extract: &VectorExtract) -> Result<()> {
        let path = self.extract_path(id);
        let collection = extract_to_geojson(extract);
        write_atomic(&path, |tmp| {
            let body = serde_json::to_string(&collection)
                .map_err(|e| OrthochipError::Serialization(e.to_string()))?;
            fs::write(tmp, body)?;
            Ok(())
        })?;
        tracing::debug!(
            id,
            path = %path.display(),
            features = extract.features.len(),
            "Wrote vector extract"
        );
        Ok(())
    }
}

/// FeatureCollection with the class code property and a legacy `crs` member
fn extract_to_geojson(extract: &VectorExtract) -> geojson::FeatureCollection {
    let features = extract
        .features
        .iter()
        .map(|(code, geometry)| {
            let mut properties = serde_json::Map::new();
            properties.insert(EXTRACT_CLASS_PROPERTY.to_string(), serde_json::json!(code.code()));
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let mut foreign_members = serde_json::Map::new();
    foreign_members.insert(
        "crs".to_string(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", extract.crs.epsg) }
        }),
    );

    geojson::FeatureCollection { bbox: None, features, foreign_members: Some(foreign_members) }
}
