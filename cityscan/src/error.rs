use std::path::PathBuf;
use thiserror::Error;

/// Failures of the contour / elevation statistics stage.
///
/// Only [`StageError::MissingInput`] is recoverable for the pipeline as a whole:
/// the stage is skipped and the next stage runs. The other variants are fatal to
/// the step that raised them, and to nothing else.
#[derive(Debug, Error)]
pub enum StageError {
    /// The elevation raster has not been produced for this city
    #[error("elevation raster does not exist: {}", path.display())]
    MissingInput { path: PathBuf },

    /// The raster exists but could not be decoded
    #[error("failed to read elevation raster {}: {reason}", path.display())]
    RasterRead { path: PathBuf, reason: String },

    /// Every cell is no-data, so there is no elevation range
    #[error("elevation raster has no valid cells")]
    DegenerateRaster,

    /// Fewer than 6 contour levels, the bin edges cannot be sampled
    #[error("need at least 6 contour levels to derive bin edges, found {found}")]
    InsufficientLevels { found: usize },

    /// Tracing one contour level failed
    #[error("failed to trace contour level {level}: {reason}")]
    Tracing { level: f64, reason: String },

    /// Writing an output artifact failed
    #[error("failed to write {}: {reason}", path.display())]
    Output { path: PathBuf, reason: String },

    #[error("invalid stage configuration: {0}")]
    Config(String),
}

impl StageError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StageError::MissingInput { .. })
    }

    pub(crate) fn raster_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StageError::RasterRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn output(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StageError::Output {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type StageResult<T> = Result<T, StageError>;
