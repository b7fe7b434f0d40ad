use log::{error, info, warn};
use std::path::PathBuf;

use crate::config::StageConfig;
use crate::error::StageError;
use crate::geometric::contour::{trace, write_geojson};
use crate::geometric::contour_plan::plan;
use crate::geometric::dem::{load, ElevationGrid};
use crate::geometric::elevation_stats::{bin, write_csv, ElevationHistogram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Contours and statistics written without errors
    Completed,
    /// One sub-step (or some contour levels) failed, the rest was written
    PartiallyFailed,
    /// Switched off by a menu flag, or the elevation raster is missing
    Skipped,
    /// Nothing could be produced
    Failed,
}

/// What the stage did, handed back to the pipeline runner
#[derive(Debug)]
pub struct StageReport {
    pub status: StageStatus,
    pub feature_count: usize,
    pub histogram: Option<ElevationHistogram>,
    pub contours_path: Option<PathBuf>,
    pub stats_path: Option<PathBuf>,
    /// One line per failure, already logged
    pub failures: Vec<String>,
}

impl StageReport {
    fn new(status: StageStatus) -> Self {
        StageReport {
            status,
            feature_count: 0,
            histogram: None,
            contours_path: None,
            stats_path: None,
            failures: Vec::new(),
        }
    }

    fn failed_with(status: StageStatus, err: &StageError) -> Self {
        let mut report = StageReport::new(status);
        report.failures.push(err.to_string());
        report
    }
}

/// Contour lines + elevation statistics for one city
///
/// Reads `<city>_elevation.tif` from the city's spatial output folder and
/// writes `<city>_contours.geojson` next to it and `<city>_elevation.csv`
/// into the tabular folder. Errors never escape [`ContourElevStats::run`],
/// they are logged and summarised in the [`StageReport`].
pub struct ContourElevStats {
    config: StageConfig,
}

impl ContourElevStats {
    pub fn new(config: StageConfig) -> Self {
        ContourElevStats { config }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn run(&self) -> StageReport {
        if !self.config.is_enabled() {
            info!("contour / elevation stats disabled for {}", self.config.city_name);
            return StageReport::new(StageStatus::Skipped);
        }
        if self.config.city_slug().is_empty() {
            let err = StageError::Config("city_name is empty".to_string());
            error!("{}", err);
            return StageReport::failed_with(StageStatus::Failed, &err);
        }

        info!("run contour for {}", self.config.city_name);
        let raster_path = self.config.elevation_raster_path();
        let grid = match load(&raster_path, self.config.nodata_fallback) {
            Ok(grid) => grid,
            Err(err) if err.is_recoverable() => {
                warn!("cannot generate contour lines or elevation stats: {}", err);
                return StageReport::failed_with(StageStatus::Skipped, &err);
            }
            Err(err) => {
                error!("{}", err);
                return StageReport::failed_with(StageStatus::Failed, &err);
            }
        };

        self.run_on_grid(&grid)
    }

    /// Plan, trace and bin an already loaded grid, writing both outputs
    pub fn run_on_grid(&self, grid: &ElevationGrid) -> StageReport {
        let contour_plan = match plan(grid, self.config.lowest_level) {
            Ok(p) => p,
            Err(err) => {
                error!("{}", err);
                return StageReport::failed_with(StageStatus::Failed, &err);
            }
        };

        let mut report = StageReport::new(StageStatus::Completed);

        info!("generate contour lines");
        let contours = trace(grid, &contour_plan);
        let mut contours_ok = !contours.is_partial();
        for err in &contours.failures {
            report.failures.push(err.to_string());
        }
        let contours_path = self.config.contours_path();
        match write_geojson(&contours.features, &grid.geo_core, &contours_path) {
            Ok(()) => {
                report.feature_count = contours.features.len();
                report.contours_path = Some(contours_path);
            }
            Err(err) => {
                error!("generate contour lines failed: {}", err);
                report.failures.push(err.to_string());
                contours_ok = false;
            }
        }

        info!("calculate elevation stats");
        let stats_path = self.config.elevation_stats_path();
        let stats_ok = match bin(grid, &contour_plan)
            .and_then(|h| write_csv(&h, &stats_path).map(|()| h))
        {
            Ok(histogram) => {
                report.histogram = Some(histogram);
                report.stats_path = Some(stats_path);
                true
            }
            Err(err) => {
                error!("calculate elevation stats failed: {}", err);
                report.failures.push(err.to_string());
                false
            }
        };

        report.status = match (contours_ok, stats_ok) {
            (true, true) => StageStatus::Completed,
            (false, false) if report.contours_path.is_none() => StageStatus::Failed,
            _ => StageStatus::PartiallyFailed,
        };
        info!(
            "contour / elevation stats for {}: {:?}, {} contour features",
            self.config.city_name, report.status, report.feature_count
        );
        report
    }
}
