//! Orthochip Pipeline - Per-tile extraction and batch orchestration
//!
//! A tile runs Coordinate Resolver, Window Planner, Raster Extractor and
//! Vector Rasterizer in that order. The orchestrator drives tiles
//! sequentially or on a worker pool and owns the batch log.

pub mod extract;
pub mod grid;
pub mod orchestrator;
pub mod points;
pub mod tile;
pub mod vectorize;

pub use extract::{RasterExtraction, RasterExtractor};
pub use grid::{generate_query_grid, QueryGrid};
pub use orchestrator::{BatchOptions, BatchOrchestrator, BatchProgress, BatchReport};
pub use points::{build_requests, load_query_points, write_query_points, QueryPoint};
pub use tile::{TilePipeline, TileSources};
pub use vectorize::{VectorRasterization, VectorRasterizer};
