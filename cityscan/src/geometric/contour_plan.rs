use log::debug;

use crate::config::LowestLevelPolicy;
use crate::error::{StageError, StageResult};
use crate::geometric::dem::ElevationGrid;

/// Elevation levels to trace, strictly increasing
#[derive(Debug, Clone, PartialEq)]
pub struct ContourPlan {
    pub data_min: f64,
    pub data_max: f64,
    pub interval: f64,
    pub levels: Vec<f64>,
}

impl ContourPlan {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Contour spacing for an elevation range
///
/// Flat cities (range <= 50) get 1 unit contours; above 250 the interval
/// grows by 10 for every started 500 units of range.
pub fn contour_interval(range: f64) -> f64 {
    if range > 250.0 {
        (range / 500.0).ceil() * 10.0
    } else if range > 100.0 {
        5.0
    } else if range > 50.0 {
        2.0
    } else {
        1.0
    }
}

/// Plan contour levels for `grid`
pub fn plan(grid: &ElevationGrid, policy: LowestLevelPolicy) -> StageResult<ContourPlan> {
    let (data_min, data_max) = grid.value_range().ok_or(StageError::DegenerateRaster)?;
    Ok(plan_for_range(data_min, data_max, policy))
}

/// Plan contour levels for a known `[data_min, data_max]`
pub fn plan_for_range(data_min: f64, data_max: f64, policy: LowestLevelPolicy) -> ContourPlan {
    let interval = contour_interval(data_max - data_min);
    let level_min = (data_min / interval).floor() * interval;
    let level_max = (data_max / interval).ceil() * interval;

    let steps = ((level_max - level_min) / interval).round() as usize;
    let first = match policy {
        LowestLevelPolicy::AboveMinimum if level_min < data_min && steps > 0 => 1,
        _ => 0,
    };
    let levels: Vec<f64> = (first..=steps)
        .map(|k| level_min + k as f64 * interval)
        .collect();

    debug!(
        "Contour plan: data range {}..{}, interval {}, {} levels ({}..{})",
        data_min,
        data_max,
        interval,
        levels.len(),
        level_min,
        level_max
    );

    ContourPlan {
        data_min,
        data_max,
        interval,
        levels,
    }
}
