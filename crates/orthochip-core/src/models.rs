pub mod catalog;
pub mod chip;
pub mod class_code;
pub mod geometry;
pub mod grid;
pub mod request;
pub mod resolution;
pub mod state;

pub use catalog::{cadastre_epoch_before, CatalogEntry};
pub use chip::{ImageChip, MaskChip, VectorExtract, VectorFeature};
pub use class_code::ClassCode;
pub use geometry::{Crs, GeoPoint};
pub use grid::{Affine, PixelWindow, RasterGrid};
pub use request::{
    BandGroup, ChannelLayout, ChipShape, ChipSpec, ChipSpecBuilder, ExecutionMode, NodataPolicy,
    TileRequest,
};
pub use resolution::{OverviewLevel, PixelSize, PIXEL_SIZE_LADDER};
pub use state::{AxisOutcome, BatchCounts, BatchLog, ClassShare, TilePhase, TileState, TileSummary};
