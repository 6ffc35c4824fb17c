//! Orthochip Store - Adapters for imagery, cadastre, catalog and outputs
//!
//! Local GeoTIFF/GeoJSON adapters for the source ports, file based tile and
//! batch log sinks, and in-memory implementations for development and tests.

pub mod batch_log;
pub mod geotiff;
pub mod local;
pub mod memory;
pub mod sink;

pub use batch_log::CsvBatchLogStore;
pub use geotiff::{read_geotiff, GeoTiffWriter};
pub use local::{load_catalog_geojson, GeoJsonVectorSource, LocalRasterSource};
pub use memory::{
    MemoryBatchLogStore, MemoryRasterSource, MemoryTileSink, MemoryTransformer, MemoryVectorSource,
};
pub use sink::FileTileSink;
