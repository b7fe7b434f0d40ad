use log::debug;
use serde::Serialize;
use std::path::Path;

use crate::commons::basic_functions::label_int;
use crate::error::{StageError, StageResult};
use crate::geometric::contour_plan::ContourPlan;
use crate::geometric::dem::ElevationGrid;

/// Number of bin edges; they bound `BIN_EDGES - 1` buckets
pub const BIN_EDGES: usize = 6;

/// One CSV row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramBin {
    #[serde(rename = "Bin")]
    pub label: String,
    #[serde(rename = "Count")]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElevationHistogram {
    pub edges: [f64; BIN_EDGES],
    pub bins: Vec<HistogramBin>,
}

impl ElevationHistogram {
    pub fn total(&self) -> u64 {
        self.bins.iter().map(|b| b.count).sum()
    }
}

/// Sample 6 bin edges from the contour levels
///
/// Edge `i` is `levels[floor(((n - 6) / 5 + 1) * i)]`, which spreads the
/// edges over the whole level range and keeps histogram buckets aligned with
/// contour bands.
pub fn bin_edges(levels: &[f64]) -> StageResult<[f64; BIN_EDGES]> {
    let n = levels.len();
    if n < BIN_EDGES {
        return Err(StageError::InsufficientLevels { found: n });
    }
    let step = (n as f64 - 6.0) / 5.0 + 1.0;
    let mut edges = [0.0; BIN_EDGES];
    for (i, edge) in edges.iter_mut().enumerate() {
        let idx = (step * i as f64).floor() as usize;
        *edge = *levels
            .get(idx)
            .ok_or(StageError::InsufficientLevels { found: n })?;
    }
    Ok(edges)
}

/// Count valid cells per bucket
/// Buckets are `[e_i, e_{i+1})` except the last, which also takes `e_5`;
/// values outside `[e_0, e_5]` are not counted
pub fn histogram(values: impl Iterator<Item = f64>, edges: &[f64; BIN_EDGES]) -> [u64; BIN_EDGES - 1] {
    let mut counts = [0u64; BIN_EDGES - 1];
    let (lo, hi) = (edges[0], edges[BIN_EDGES - 1]);
    for v in values {
        if !(lo..=hi).contains(&v) {
            continue;
        }
        // first edge strictly above v, the closed top edge falls into the last bucket
        let upper = edges.partition_point(|e| *e <= v);
        let bucket = upper.saturating_sub(1).min(BIN_EDGES - 2);
        counts[bucket] += 1;
    }
    counts
}

/// Elevation histogram of `grid` against edges sampled from `plan`
pub fn bin(grid: &ElevationGrid, plan: &ContourPlan) -> StageResult<ElevationHistogram> {
    let edges = bin_edges(&plan.levels)?;
    let counts = histogram(grid.valid_values(), &edges);
    let bins = counts
        .iter()
        .enumerate()
        .map(|(i, &count)| HistogramBin {
            label: format!("{}-{}", label_int(edges[i]), label_int(edges[i + 1])),
            count,
        })
        .collect();
    let histogram = ElevationHistogram { edges, bins };
    debug!(
        "Elevation histogram over edges {:?}: {} cells binned",
        histogram.edges,
        histogram.total()
    );
    Ok(histogram)
}

/// Write the histogram as `Bin,Count` CSV
pub fn write_csv(histogram: &ElevationHistogram, path: &Path) -> StageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StageError::output(path, e))?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| StageError::output(path, e))?;
    for row in &histogram.bins {
        writer.serialize(row).map_err(|e| StageError::output(path, e))?;
    }
    writer.flush().map_err(|e| StageError::output(path, e))?;
    debug!("Elevation stats saved to: {:?}", path);
    Ok(())
}
