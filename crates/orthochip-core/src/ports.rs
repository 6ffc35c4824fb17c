//! Port trait definitions
//!
//! These traits define the interfaces that imagery, cadastre, catalog and
//! output adapters must implement.

pub mod sink;
pub mod sources;

pub use sink::{BatchLogStore, TileSink};
pub use sources::{Catalog, PointTransformer, RasterHandle, RasterSource, VectorHandle, VectorSource, WindowRead};
