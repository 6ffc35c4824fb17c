use crate::error::Result;
use crate::models::{BatchLog, ImageChip, MaskChip, VectorExtract};

/// Port for persisting tile outputs
pub trait TileSink: Send + Sync {
    /// Both the imagery chip and the mask chip of `id` already exist
    fn outputs_exist(&self, id: &str) -> bool;

    fn write_image(&self, id: &str, chip: &ImageChip) -> Result<()>;

    fn write_mask(&self, id: &str, mask: &MaskChip) -> Result<()>;

    fn write_vector_extract(&self, id: &str, extract: &VectorExtract) -> Result<()>;
}

/// Port for durable batch log storage
pub trait BatchLogStore: Send + Sync {
    /// Previously flushed log, empty when none exists
    fn load(&self) -> Result<BatchLog>;

    /// Replace the stored log with `log`
    fn flush(&self, log: &BatchLog) -> Result<()>;
}
