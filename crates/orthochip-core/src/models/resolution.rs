//! Pixel-size ladder and overview levels.
//!
//! Allowed pixel sizes form a geometric progression by powers of two starting
//! at the native orthophoto resolution. Each step up the ladder maps to the
//! next internal overview of the source mosaics.

use crate::error::{OrthochipError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Allowed pixel sizes in meters
pub const PIXEL_SIZE_LADDER: [f64; 11] =
    [0.2, 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2, 102.4, 204.8];

/// Relative tolerance used when matching a float against the ladder
const LADDER_TOLERANCE: f64 = 1e-9;

/// Resolution level of a raster source: -1 is native, 0..N successive halvings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverviewLevel(i8);

impl OverviewLevel {
    pub const NATIVE: OverviewLevel = OverviewLevel(-1);

    pub fn new(level: i8) -> Result<Self> {
        let max = PIXEL_SIZE_LADDER.len() as i8 - 2;
        if !(-1..=max).contains(&level) {
            return Err(OrthochipError::validation(
                "overview_level",
                format!("{} is outside -1..={}", level, max),
            ));
        }
        Ok(Self(level))
    }

    pub fn value(&self) -> i8 {
        self.0
    }

    pub fn is_native(&self) -> bool {
        self.0 == -1
    }

    /// Image directory holding this level in a tiled GeoTIFF (0 = native)
    pub fn image_index(&self) -> usize {
        (self.0 + 1) as usize
    }

    /// Linear decimation factor relative to native resolution
    pub fn decimation(&self) -> u32 {
        1 << self.image_index()
    }
}

impl fmt::Display for OverviewLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "native")
        } else {
            write!(f, "overview {}", self.0)
        }
    }
}

/// A pixel size validated against the ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct PixelSize {
    meters: f64,
    step: usize,
}

impl PixelSize {
    pub fn new(meters: f64) -> Result<Self> {
        let step = ladder_step(meters).ok_or_else(|| {
            OrthochipError::validation(
                "pixel_size",
                format!("{} is not one of {:?}", meters, PIXEL_SIZE_LADDER),
            )
        })?;
        Ok(Self { meters: PIXEL_SIZE_LADDER[step], step })
    }

    pub fn meters(&self) -> f64 {
        self.meters
    }

    /// Overview level that serves this pixel size
    pub fn level(&self) -> OverviewLevel {
        OverviewLevel(self.step as i8 - 1)
    }

    /// Next coarser pixel size; the ladder continues geometrically past its last entry
    pub fn next_step(&self) -> f64 {
        PIXEL_SIZE_LADDER.get(self.step + 1).copied().unwrap_or(self.meters * 2.0)
    }

    /// Every allowed pixel size, finest first
    pub fn all() -> impl Iterator<Item = PixelSize> {
        PIXEL_SIZE_LADDER.iter().enumerate().map(|(step, &meters)| PixelSize { meters, step })
    }
}

impl TryFrom<f64> for PixelSize {
    type Error = OrthochipError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PixelSize> for f64 {
    fn from(value: PixelSize) -> Self {
        value.meters
    }
}

impl fmt::Display for PixelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} m", self.meters)
    }
}

fn ladder_step(meters: f64) -> Option<usize> {
    if !meters.is_finite() {
        return None;
    }
    PIXEL_SIZE_LADDER
        .iter()
        .position(|&step| (meters - step).abs() <= LADDER_TOLERANCE * step)
}
