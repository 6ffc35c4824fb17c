//! Orthochip Geo - Reprojection, catalog lookup, window planning and burning
//!
//! This crate holds the geometric half of tile extraction: turning a query
//! point into a catalog sheet and a pixel-exact window, and burning vector
//! features onto that window's grid.

pub mod index;
pub mod rasterize;
pub mod resolver;
pub mod transform;
pub mod window;

pub use index::CatalogIndex;
pub use rasterize::{burn_geometry, rasterize};
pub use resolver::CoordinateResolver;
pub use transform::{reproject_geometry, transform_rect, ProjTransformer};
pub use window::{plan_window, ExtractionWindow};
