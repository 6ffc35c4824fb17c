//! Orthochip Core - Domain models, configuration, and capability ports
//!
//! This crate contains the request/state model of the chip extraction pipeline
//! and the port definitions that imagery, cadastre and catalog adapters implement.

pub mod config;
pub mod error;
pub mod models;
pub mod ports;

pub use error::{OrthochipError, Result};
