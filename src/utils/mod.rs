//! Utility functions and types for the fusion engine.

pub mod error;
pub mod geo;
pub mod logging;

pub use error::{Error, Result};
pub use geo::{haversine_km, GridCell, Location};
pub use logging::init_logging;
