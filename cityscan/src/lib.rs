//! City scan raster processing: contour lines and elevation statistics
//! derived from a city's elevation raster.

pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod stage;

pub use config::{LowestLevelPolicy, StageConfig};
pub use error::{StageError, StageResult};
pub use stage::{ContourElevStats, StageReport, StageStatus};
