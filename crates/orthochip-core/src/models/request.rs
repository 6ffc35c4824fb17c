//! Tile requests and the batch-shared chip specification.

use super::class_code::ClassCode;
use super::geometry::GeoPoint;
use super::resolution::PixelSize;
use crate::error::{OrthochipError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// A group of bands stored in one imagery source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandGroup {
    Rgb,
    Nir,
}

impl BandGroup {
    pub fn band_count(&self) -> usize {
        match self {
            BandGroup::Rgb => 3,
            BandGroup::Nir => 1,
        }
    }
}

impl fmt::Display for BandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandGroup::Rgb => write!(f, "rgb"),
            BandGroup::Nir => write!(f, "nir"),
        }
    }
}

/// Channel layout of an imagery chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    /// Red, green, blue
    Rgb,
    /// Red, green, blue, near infrared
    Rgbn,
}

impl ChannelLayout {
    pub fn from_channels(channels: usize) -> Result<Self> {
        match channels {
            3 => Ok(ChannelLayout::Rgb),
            4 => Ok(ChannelLayout::Rgbn),
            other => Err(OrthochipError::validation(
                "shape",
                format!("channel count must be 3 or 4, got {}", other),
            )),
        }
    }

    pub fn channels(&self) -> usize {
        self.band_groups().iter().map(BandGroup::band_count).sum()
    }

    /// Source groups to read, in output band order
    pub fn band_groups(&self) -> &'static [BandGroup] {
        match self {
            ChannelLayout::Rgb => &[BandGroup::Rgb],
            ChannelLayout::Rgbn => &[BandGroup::Rgb, BandGroup::Nir],
        }
    }
}

/// Output chip shape as (channels, height, width)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChipShape {
    pub layout: ChannelLayout,
    pub height: usize,
    pub width: usize,
}

impl ChipShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Result<Self> {
        let layout = ChannelLayout::from_channels(channels)?;
        if height == 0 || width == 0 {
            return Err(OrthochipError::validation(
                "shape",
                format!("height and width must be positive, got {}x{}", height, width),
            ));
        }
        Ok(Self { layout, height, width })
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.channels(), self.height, self.width]
    }
}

impl fmt::Display for ChipShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.channels(), self.height, self.width)
    }
}

/// What to do with a tile whose window exceeds source coverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodataPolicy {
    /// Pad to the requested shape and mark the tile
    #[default]
    Flag,
    /// Discard the tile
    Remove,
}

impl FromStr for NodataPolicy {
    type Err = OrthochipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "flag" => Ok(NodataPolicy::Flag),
            "remove" => Ok(NodataPolicy::Remove),
            other => Err(OrthochipError::validation(
                "nodata_mode",
                format!("expected 'flag' or 'remove', got '{}'", other),
            )),
        }
    }
}

impl fmt::Display for NodataPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodataPolicy::Flag => write!(f, "flag"),
            NodataPolicy::Remove => write!(f, "remove"),
        }
    }
}

/// Batch execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl FromStr for ExecutionMode {
    type Err = OrthochipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            other => Err(OrthochipError::validation(
                "mode",
                format!("expected 'sequential' or 'parallel', got '{}'", other),
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Parameters shared by every tile of a batch
///
/// Validated once by [`ChipSpecBuilder::build`] and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ChipSpec {
    pixel_size: PixelSize,
    resample_size: Option<f64>,
    shape: ChipShape,
    classes: BTreeSet<ClassCode>,
    nodata_policy: NodataPolicy,
    nodata_value: u8,
    write_vector_extract: bool,
    outpath: PathBuf,
}

impl ChipSpec {
    pub fn builder(pixel_size: f64, shape: [usize; 3]) -> ChipSpecBuilder {
        ChipSpecBuilder::new(pixel_size, shape)
    }

    pub fn pixel_size(&self) -> PixelSize {
        self.pixel_size
    }

    pub fn resample_size(&self) -> Option<f64> {
        self.resample_size
    }

    pub fn shape(&self) -> ChipShape {
        self.shape
    }

    pub fn classes(&self) -> &BTreeSet<ClassCode> {
        &self.classes
    }

    pub fn nodata_policy(&self) -> NodataPolicy {
        self.nodata_policy
    }

    pub fn nodata_value(&self) -> u8 {
        self.nodata_value
    }

    pub fn write_vector_extract(&self) -> bool {
        self.write_vector_extract
    }

    pub fn outpath(&self) -> &Path {
        &self.outpath
    }

    /// Ground size of one output pixel
    pub fn output_pixel_size(&self) -> f64 {
        self.resample_size.unwrap_or_else(|| self.pixel_size.meters())
    }

    /// Source pixels to read as (height, width) before any resampling
    pub fn source_extent(&self) -> (usize, usize) {
        match self.resample_size {
            Some(resample) => {
                let ratio = resample / self.pixel_size.meters();
                (
                    (self.shape.height as f64 * ratio).round() as usize,
                    (self.shape.width as f64 * ratio).round() as usize,
                )
            }
            None => (self.shape.height, self.shape.width),
        }
    }
}

/// Raw, unvalidated chip parameters
#[derive(Debug, Clone)]
pub struct ChipSpecBuilder {
    pixel_size: f64,
    shape: [usize; 3],
    resample_size: Option<f64>,
    classes: Vec<u16>,
    nodata_policy: NodataPolicy,
    nodata_value: u8,
    write_vector_extract: bool,
    outpath: PathBuf,
}

impl ChipSpecBuilder {
    pub fn new(pixel_size: f64, shape: [usize; 3]) -> Self {
        Self {
            pixel_size,
            shape,
            resample_size: None,
            classes: Vec::new(),
            nodata_policy: NodataPolicy::default(),
            nodata_value: 0,
            write_vector_extract: false,
            outpath: PathBuf::from("."),
        }
    }

    pub fn resample_size(mut self, resample_size: Option<f64>) -> Self {
        self.resample_size = resample_size;
        self
    }

    pub fn classes(mut self, classes: impl IntoIterator<Item = u16>) -> Self {
        self.classes = classes.into_iter().collect();
        self
    }

    pub fn nodata_policy(mut self, policy: NodataPolicy) -> Self {
        self.nodata_policy = policy;
        self
    }

    pub fn nodata_value(mut self, value: u8) -> Self {
        self.nodata_value = value;
        self
    }

    pub fn write_vector_extract(mut self, enabled: bool) -> Self {
        self.write_vector_extract = enabled;
        self
    }

    pub fn outpath(mut self, outpath: impl Into<PathBuf>) -> Self {
        self.outpath = outpath.into();
        self
    }

    pub fn build(self) -> Result<ChipSpec> {
        let pixel_size = PixelSize::new(self.pixel_size)?;
        let shape = ChipShape::new(self.shape[0], self.shape[1], self.shape[2])?;

        if let Some(resample) = self.resample_size {
            let upper = pixel_size.next_step();
            if !resample.is_finite() || resample <= pixel_size.meters() || resample >= upper {
                return Err(OrthochipError::validation(
                    "resample_size",
                    format!(
                        "{} must be greater than {} and smaller than {}",
                        resample,
                        pixel_size.meters(),
                        upper
                    ),
                ));
            }
        }

        if self.classes.is_empty() {
            return Err(OrthochipError::validation("mask_label", "at least one class code is required"));
        }
        let classes = self
            .classes
            .into_iter()
            .map(ClassCode::try_from)
            .collect::<Result<BTreeSet<_>>>()?;

        if self.outpath.as_os_str().is_empty() {
            return Err(OrthochipError::validation("outpath", "must not be empty"));
        }

        Ok(ChipSpec {
            pixel_size,
            resample_size: self.resample_size,
            shape,
            classes,
            nodata_policy: self.nodata_policy,
            nodata_value: self.nodata_value,
            write_vector_extract: self.write_vector_extract,
            outpath: self.outpath,
        })
    }
}

/// One query point to extract, bound to the batch chip specification
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    id: String,
    point: GeoPoint,
    spec: Arc<ChipSpec>,
}

impl TileRequest {
    pub fn new(id: impl Into<String>, lon: f64, lat: f64, spec: Arc<ChipSpec>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(OrthochipError::validation("id", "must not be empty"));
        }
        if id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(OrthochipError::validation(
                "id",
                format!("'{}' cannot be used in an output file name", id),
            ));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(OrthochipError::validation("lon", format!("{} is out of range", lon)));
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(OrthochipError::validation("lat", format!("{} is out of range", lat)));
        }

        Ok(Self { id, point: GeoPoint::new(lon, lat), spec })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn point(&self) -> GeoPoint {
        self.point
    }

    pub fn spec(&self) -> &ChipSpec {
        &self.spec
    }

    pub fn pixel_size(&self) -> PixelSize {
        self.spec.pixel_size()
    }

    pub fn shape(&self) -> ChipShape {
        self.spec.shape()
    }

    pub fn outpath(&self) -> &Path {
        self.spec.outpath()
    }

    pub fn classes(&self) -> &BTreeSet<ClassCode> {
        self.spec.classes()
    }

    pub fn nodata_policy(&self) -> NodataPolicy {
        self.spec.nodata_policy()
    }

    pub fn nodata_value(&self) -> u8 {
        self.spec.nodata_value()
    }

    pub fn resample_size(&self) -> Option<f64> {
        self.spec.resample_size()
    }

    pub fn write_vector_extract(&self) -> bool {
        self.spec.write_vector_extract()
    }
}
