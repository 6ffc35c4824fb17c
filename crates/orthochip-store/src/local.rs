//! Local file adapters: GeoTIFF imagery, GeoJSON cadastre sheets and the
//! GeoJSON catalog.

use crate::geotiff::{read_georeference, samples_per_pixel};
use chrono::NaiveDate;
use geo::{BoundingRect, Geometry, MultiPolygon};
use ndarray::Array3;
use orthochip_core::error::{OrthochipError, Result};
use orthochip_core::models::{
    CatalogEntry, Crs, OverviewLevel, PixelWindow, RasterGrid, VectorFeature,
};
use orthochip_core::ports::{RasterHandle, RasterSource, VectorHandle, VectorSource, WindowRead};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

/// Number of parsed cadastre sheets kept in memory
const VECTOR_CACHE_CAPACITY: usize = 8;

fn is_remote(locator: &str) -> bool {
    locator.contains("://")
}

fn reject_remote(locator: &str) -> Result<()> {
    if is_remote(locator) {
        return Err(OrthochipError::source_io(
            locator,
            "remote locators are not supported by the local adapters",
        ));
    }
    Ok(())
}

/// Extract EPSG code from a legacy GeoJSON `crs` member
fn crs_from_member(member: &serde_json::Value) -> Option<Crs> {
    member
        .get("properties")
        .and_then(|props| props.get("name"))
        .and_then(|name| name.as_str())
        .and_then(Crs::parse)
}

fn read_feature_collection(locator: &str) -> Result<geojson::FeatureCollection> {
    let content =
        fs::read_to_string(locator).map_err(|e| OrthochipError::source_io(locator, e))?;
    let geojson: geojson::GeoJson = content
        .parse()
        .map_err(|e| OrthochipError::source_io(locator, format!("invalid GeoJSON: {}", e)))?;

    match geojson {
        geojson::GeoJson::FeatureCollection(fc) => Ok(fc),
        geojson::GeoJson::Feature(feature) => Ok(geojson::FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        }),
        geojson::GeoJson::Geometry(_) => Err(OrthochipError::source_io(
            locator,
            "expected a FeatureCollection, found a bare geometry",
        )),
    }
}

fn collection_crs(fc: &geojson::FeatureCollection) -> Option<Crs> {
    fc.foreign_members.as_ref().and_then(|fm| fm.get("crs")).and_then(crs_from_member)
}

// ---------------------------------------------------------------------------
// Imagery
// ---------------------------------------------------------------------------

/// Reads 8-bit GeoTIFF mosaics with internal overviews from the local filesystem
#[derive(Debug, Clone)]
pub struct LocalRasterSource {
    default_crs: Crs,
}

impl LocalRasterSource {
    /// `default_crs` applies to files without GeoTIFF keys
    pub fn new(default_crs: Crs) -> Self {
        Self { default_crs }
    }
}

impl Default for LocalRasterSource {
    fn default() -> Self {
        Self::new(Crs::austria_lambert())
    }
}

impl RasterSource for LocalRasterSource {
    fn open(&self, locator: &str, level: OverviewLevel) -> Result<Box<dyn RasterHandle>> {
        reject_remote(locator)?;
        let io_err = |e: tiff::TiffError| OrthochipError::source_io(locator, e);

        let file = File::open(locator).map_err(|e| OrthochipError::source_io(locator, e))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(io_err)?
            .with_limits(Limits::unlimited());

        // Georeferencing lives on the full-resolution image
        let (native_width, native_height) = decoder.dimensions().map_err(io_err)?;
        let (transform, crs) = read_georeference(&mut decoder).map_err(io_err)?;
        let transform = transform.ok_or_else(|| {
            OrthochipError::source_io(locator, "missing GeoTIFF georeferencing tags")
        })?;
        let crs = crs.unwrap_or_else(|| self.default_crs.clone());

        let image_index = level.image_index();
        if image_index > 0 {
            decoder.seek_to_image(image_index).map_err(|e| {
                OrthochipError::source_io(
                    locator,
                    format!("{} not available: {}", level, e),
                )
            })?;
        }

        let (width, height) = decoder.dimensions().map_err(io_err)?;
        let bands = samples_per_pixel(&mut decoder).map_err(io_err)?;

        let bits = match decoder.find_tag(Tag::BitsPerSample).map_err(io_err)? {
            Some(value) => value.into_u16_vec().map_err(io_err)?,
            None => vec![1],
        };
        if bits.iter().any(|&b| b != 8) {
            return Err(OrthochipError::source_io(
                locator,
                format!("expected 8-bit samples, found {:?}", bits),
            ));
        }
        if let Some(planar) = decoder.find_tag(Tag::PlanarConfiguration).map_err(io_err)? {
            if planar.into_u16().map_err(io_err)? == 2 {
                return Err(OrthochipError::source_io(
                    locator,
                    "planar sample layout is not supported",
                ));
            }
        }

        let transform = transform.scaled(
            native_width as f64 / width as f64,
            native_height as f64 / height as f64,
        );
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();

        tracing::debug!(
            locator,
            level = %level,
            width,
            height,
            bands,
            chunk_width,
            chunk_height,
            "Opened raster source"
        );

        Ok(Box::new(LocalRasterHandle {
            locator: locator.to_string(),
            decoder,
            grid: RasterGrid {
                width: width as usize,
                height: height as usize,
                bands,
                transform,
                crs,
            },
            chunk_width: chunk_width.max(1) as usize,
            chunk_height: chunk_height.max(1) as usize,
        }))
    }
}

struct LocalRasterHandle {
    locator: String,
    decoder: Decoder<BufReader<File>>,
    grid: RasterGrid,
    chunk_width: usize,
    chunk_height: usize,
}

impl LocalRasterHandle {
    /// Decode one strip or tile; returns its pixels and data width
    fn read_chunk(&mut self, index: usize) -> Result<(Vec<u8>, usize)> {
        let chunk_index = u32::try_from(index)
            .map_err(|_| OrthochipError::source_io(&self.locator, "chunk index out of range"))?;
        let (_, data_height) = self.decoder.chunk_data_dimensions(chunk_index);
        let pixels = match self
            .decoder
            .read_chunk(chunk_index)
            .map_err(|e| OrthochipError::source_io(&self.locator, e))?
        {
            DecodingResult::U8(v) => v,
            _ => {
                return Err(OrthochipError::source_io(
                    &self.locator,
                    format!("expected 8-bit pixels in chunk {}", index),
                ))
            }
        };

        // Edge tiles may be cropped or padded depending on the encoder
        let row_len = (data_height as usize * self.grid.bands).max(1);
        let data_width = pixels.len() / row_len;
        Ok((pixels, data_width))
    }
}

impl RasterHandle for LocalRasterHandle {
    fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<WindowRead> {
        let bands = self.grid.bands;
        let Some(clipped) = window.clip_to(self.grid.width, self.grid.height) else {
            return Ok(WindowRead { data: Array3::zeros((bands, 0, 0)), clipped: None });
        };

        let col_start = clipped.col_off as usize;
        let row_start = clipped.row_off as usize;
        let col_end = col_start + clipped.width;
        let row_end = row_start + clipped.height;

        let chunks_across = self.grid.width.div_ceil(self.chunk_width);
        let mut data = Array3::<u8>::zeros((bands, clipped.height, clipped.width));

        for chunk_row in row_start / self.chunk_height..=(row_end - 1) / self.chunk_height {
            for chunk_col in col_start / self.chunk_width..=(col_end - 1) / self.chunk_width {
                let (pixels, data_width) =
                    self.read_chunk(chunk_row * chunks_across + chunk_col)?;

                let chunk_row0 = chunk_row * self.chunk_height;
                let chunk_col0 = chunk_col * self.chunk_width;
                let rows = row_start.max(chunk_row0)..row_end.min(chunk_row0 + self.chunk_height);
                let cols = col_start.max(chunk_col0)..col_end.min(chunk_col0 + self.chunk_width);

                for row in rows {
                    for col in cols.clone() {
                        let base = ((row - chunk_row0) * data_width + (col - chunk_col0)) * bands;
                        for band in 0..bands {
                            if let Some(&value) = pixels.get(base + band) {
                                data[[band, row - row_start, col - col_start]] = value;
                            }
                        }
                    }
                }
            }
        }

        Ok(WindowRead { data, clipped: Some(clipped) })
    }
}

// ---------------------------------------------------------------------------
// Cadastre sheets
// ---------------------------------------------------------------------------

type FeatureEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// A parsed cadastre sheet with an envelope index over its features
#[derive(Debug)]
struct VectorSheet {
    crs: Crs,
    features: Vec<VectorFeature>,
    tree: RTree<FeatureEnvelope>,
}

impl VectorSheet {
    fn load(locator: &str, default_crs: &Crs) -> Result<Self> {
        let fc = read_feature_collection(locator)?;
        let crs = collection_crs(&fc).unwrap_or_else(|| default_crs.clone());

        let mut features = Vec::with_capacity(fc.features.len());
        let mut skipped = 0usize;
        for feature in fc.features {
            let Some(geometry) = feature.geometry else {
                skipped += 1;
                continue;
            };
            match Geometry::<f64>::try_from(geometry) {
                Ok(geometry) => features.push(VectorFeature {
                    geometry,
                    properties: feature.properties.unwrap_or_default(),
                }),
                Err(e) => {
                    tracing::debug!(locator, error = %e, "Skipping unconvertible feature");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            tracing::warn!(locator, skipped, "Cadastre features without usable geometry");
        }

        let envelopes = features
            .iter()
            .enumerate()
            .filter_map(|(position, feature)| {
                let rect = feature.geometry.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    position,
                ))
            })
            .collect();

        tracing::debug!(locator, features = features.len(), crs = %crs, "Loaded cadastre sheet");
        Ok(Self { crs, features, tree: RTree::bulk_load(envelopes) })
    }
}

/// Reads cadastre sheets stored as GeoJSON FeatureCollections
pub struct GeoJsonVectorSource {
    default_crs: Crs,
    cache: Mutex<VecDeque<(String, Arc<VectorSheet>)>>,
}

impl GeoJsonVectorSource {
    /// `default_crs` applies to sheets without a `crs` member
    pub fn new(default_crs: Crs) -> Self {
        Self { default_crs, cache: Mutex::new(VecDeque::new()) }
    }

    fn sheet(&self, locator: &str) -> Result<Arc<VectorSheet>> {
        {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((_, sheet)) = cache.iter().find(|(key, _)| key == locator) {
                return Ok(Arc::clone(sheet));
            }
        }

        // Parse outside the lock; concurrent misses may parse the same sheet twice
        let sheet = Arc::new(VectorSheet::load(locator, &self.default_crs)?);

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if !cache.iter().any(|(key, _)| key == locator) {
            if cache.len() >= VECTOR_CACHE_CAPACITY {
                cache.pop_front();
            }
            cache.push_back((locator.to_string(), Arc::clone(&sheet)));
        }
        Ok(sheet)
    }

    /// Number of parsed sheets currently held in memory
    pub fn cached_sheets(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for GeoJsonVectorSource {
    fn default() -> Self {
        Self::new(Crs::austria_lambert())
    }
}

impl VectorSource for GeoJsonVectorSource {
    fn open(&self, locator: &str) -> Result<Box<dyn VectorHandle>> {
        reject_remote(locator)?;
        Ok(Box::new(GeoJsonVectorHandle { sheet: self.sheet(locator)? }))
    }
}

struct GeoJsonVectorHandle {
    sheet: Arc<VectorSheet>,
}

impl VectorHandle for GeoJsonVectorHandle {
    fn crs(&self) -> &Crs {
        &self.sheet.crs
    }

    fn filter(
        &mut self,
        bbox: &geo::Rect<f64>,
        predicate: &dyn Fn(&VectorFeature) -> bool,
    ) -> Result<Vec<VectorFeature>> {
        let query = AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y]);
        let mut positions: Vec<usize> = self
            .sheet
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|hit| hit.data)
            .collect();
        positions.sort_unstable();

        Ok(positions
            .into_iter()
            .map(|position| &self.sheet.features[position])
            .filter(|feature| predicate(feature))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

fn string_property(
    properties: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    match properties.get(key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve a locator relative to the catalog's directory
fn resolve_locator(base: &Path, locator: String) -> String {
    if is_remote(&locator) || Path::new(&locator).is_absolute() {
        locator
    } else {
        base.join(locator).display().to_string()
    }
}

/// Load catalog entries from a GeoJSON FeatureCollection of coverage polygons
///
/// Entries keep file order. The catalog CRS comes from the legacy `crs`
/// member and defaults to MGI / Austria Lambert.
pub fn load_catalog_geojson<P: AsRef<Path>>(path: P) -> Result<(Crs, Vec<CatalogEntry>)> {
    let path = path.as_ref();
    let locator = path.display().to_string();
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let fc = read_feature_collection(&locator)?;
    let crs = collection_crs(&fc).unwrap_or_else(Crs::austria_lambert);

    let mut entries = Vec::with_capacity(fc.features.len());
    for (position, feature) in fc.features.into_iter().enumerate() {
        let invalid = |reason: String| {
            OrthochipError::source_io(&locator, format!("feature {}: {}", position, reason))
        };

        let properties = feature.properties.unwrap_or_default();
        let required = |key: &str| {
            string_property(&properties, key)
                .ok_or_else(|| invalid(format!("missing property '{}'", key)))
        };

        let sheet_id = string_property(&properties, "sheet_id")
            .unwrap_or_else(|| position.to_string());
        let rgb_locator = resolve_locator(base, required("rgb_raster")?);
        let nir_locator =
            string_property(&properties, "nir_raster").map(|l| resolve_locator(base, l));
        let vector_locator = resolve_locator(base, required("vector_url")?);
        let valid_from = required("valid_from")?;
        let valid_from = NaiveDate::parse_from_str(&valid_from, "%Y-%m-%d")
            .map_err(|e| invalid(format!("invalid valid_from '{}': {}", valid_from, e)))?;

        let geometry = feature
            .geometry
            .ok_or_else(|| invalid("missing coverage geometry".to_string()))?;
        let coverage = match Geometry::<f64>::try_from(geometry)
            .map_err(|e| invalid(format!("invalid coverage geometry: {}", e)))?
        {
            Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            Geometry::MultiPolygon(multi) => multi,
            other => {
                return Err(invalid(format!(
                    "coverage must be a Polygon or MultiPolygon, found {}",
                    geometry_kind(&other)
                )))
            }
        };

        entries.push(CatalogEntry {
            sheet_id,
            coverage,
            rgb_locator,
            nir_locator,
            vector_locator,
            valid_from,
        });
    }

    tracing::info!(path = %locator, entries = entries.len(), crs = %crs, "Loaded catalog");
    Ok((crs, entries))
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
