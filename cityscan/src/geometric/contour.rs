//! Iso-elevation line extraction.
//!
//! Marching squares over 2x2 blocks of pixel centres. Blocks touching a
//! no-data cell are skipped so lines never interpolate across gaps. Cell
//! segments are stitched through the grid edges they cross, which makes the
//! discovery order (raster scan) and therefore the output deterministic.

use geo::{BoundingRect, Coord, LineString};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry};
use log::{debug, warn};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::path::Path;

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::{StageError, StageResult};
use crate::geo_core::{BoundingBox, GeoCore};
use crate::geometric::contour_plan::ContourPlan;
use crate::geometric::dem::ElevationGrid;

/// Traced polyline in pixel index space (x = column, y = row of the pixel centre)
#[derive(Debug, Clone, PartialEq)]
pub struct PixelLine {
    pub level: f64,
    pub points: Vec<(f64, f64)>,
}

/// One contour line in the raster's geographic coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ContourFeature {
    pub level: f64,
    pub line: LineString<f64>,
}

/// Result of tracing every planned level
#[derive(Debug, Default)]
pub struct ContourTrace {
    /// Grouped by ascending level, raster-scan discovery order within a level
    pub features: Vec<ContourFeature>,
    /// Levels that could not be traced
    pub failures: Vec<StageError>,
}

impl ContourTrace {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Grid edge between two horizontally or vertically adjacent pixel centres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EdgeKey {
    /// Between (col, row) and (col + 1, row)
    Horizontal { row: usize, col: usize },
    /// Between (col, row) and (col, row + 1)
    Vertical { row: usize, col: usize },
}

impl EdgeKey {
    fn crossing(&self, grid: &ElevationGrid, level: f64) -> (f64, f64) {
        match *self {
            EdgeKey::Horizontal { row, col } => {
                let t = fraction(grid.get(col, row), grid.get(col + 1, row), level);
                (col as f64 + t, row as f64)
            }
            EdgeKey::Vertical { row, col } => {
                let t = fraction(grid.get(col, row), grid.get(col, row + 1), level);
                (col as f64, row as f64 + t)
            }
        }
    }
}

/// Where `level` crosses the segment from `a` to `b`, as a fraction of its length
fn fraction(a: f64, b: f64, level: f64) -> f64 {
    let d = b - a;
    if d == 0.0 {
        return 0.5;
    }
    ((level - a) / d).clamp(0.0, 1.0)
}

/// Append the edge pairs crossed by the contour inside the block whose
/// top-left pixel is (col, row)
fn block_segments(
    grid: &ElevationGrid,
    col: usize,
    row: usize,
    level: f64,
    out: &mut Vec<(EdgeKey, EdgeKey)>,
) {
    let tl = grid.get(col, row);
    let tr = grid.get(col + 1, row);
    let br = grid.get(col + 1, row + 1);
    let bl = grid.get(col, row + 1);
    if [tl, tr, br, bl].iter().any(|v| !grid.is_valid(*v)) {
        return;
    }

    let mut case = 0u8;
    if tl >= level {
        case |= 1;
    }
    if tr >= level {
        case |= 2;
    }
    if br >= level {
        case |= 4;
    }
    if bl >= level {
        case |= 8;
    }

    let top = EdgeKey::Horizontal { row, col };
    let bottom = EdgeKey::Horizontal { row: row + 1, col };
    let left = EdgeKey::Vertical { row, col };
    let right = EdgeKey::Vertical { row, col: col + 1 };
    let centre_high = (tl + tr + br + bl) / 4.0 >= level;

    match case {
        1 | 14 => out.push((left, top)),
        2 | 13 => out.push((top, right)),
        3 | 12 => out.push((left, right)),
        4 | 11 => out.push((right, bottom)),
        6 | 9 => out.push((top, bottom)),
        7 | 8 => out.push((left, bottom)),
        // saddles: the centre decides which diagonal pair stays connected
        5 | 10 => {
            let (a, b) = if (case == 5) == centre_high {
                ((top, right), (left, bottom))
            } else {
                ((left, top), (right, bottom))
            };
            out.push(a);
            out.push(b);
        }
        // 0 and 15: block entirely below or above the level
        _ => {}
    }
}

/// Trace one level into pixel-space polylines
pub fn trace_pixel_lines(grid: &ElevationGrid, level: f64) -> StageResult<Vec<PixelLine>> {
    if !level.is_finite() {
        return Err(StageError::Tracing {
            level,
            reason: "level is not finite".to_string(),
        });
    }
    let (width, height) = (grid.width(), grid.height());
    if width < 2 || height < 2 {
        return Ok(Vec::new());
    }

    let mut segments: Vec<(EdgeKey, EdgeKey)> = Vec::new();
    for row in 0..height - 1 {
        for col in 0..width - 1 {
            block_segments(grid, col, row, level, &mut segments);
        }
    }

    let mut at_edge: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
    for (i, (a, b)) in segments.iter().enumerate() {
        at_edge.entry(*a).or_default().push(i);
        at_edge.entry(*b).or_default().push(i);
    }
    if let Some((edge, _)) = at_edge.iter().find(|(_, segs)| segs.len() > 2) {
        return Err(StageError::Tracing {
            level,
            reason: format!("edge {:?} is shared by more than two segments", edge),
        });
    }

    let mut used = vec![false; segments.len()];
    let mut lines = Vec::new();
    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (a, b) = segments[start];

        let mut forward = vec![a, b];
        walk(&segments, &at_edge, &mut used, &mut forward);
        let mut backward = vec![a];
        walk(&segments, &at_edge, &mut used, &mut backward);

        backward.reverse();
        backward.pop();
        backward.extend(forward);

        let mut points: Vec<(f64, f64)> = Vec::with_capacity(backward.len());
        for key in &backward {
            let p = key.crossing(grid, level);
            if points.last() != Some(&p) {
                points.push(p);
            }
        }
        if points.len() >= 2 {
            lines.push(PixelLine { level, points });
        }
    }

    Ok(lines)
}

/// Follow unused segments from the last edge of `chain` until the line ends or closes
fn walk(
    segments: &[(EdgeKey, EdgeKey)],
    at_edge: &HashMap<EdgeKey, Vec<usize>>,
    used: &mut [bool],
    chain: &mut Vec<EdgeKey>,
) {
    while let Some(&end) = chain.last() {
        let next = at_edge
            .get(&end)
            .and_then(|segs| segs.iter().copied().find(|s| !used[*s]));
        let Some(seg) = next else {
            break;
        };
        used[seg] = true;
        let (a, b) = segments[seg];
        chain.push(if a == end { b } else { a });
    }
}

/// Map pixel-space lines to geographic features through the grid transform
/// Pixel (col, row) values sit at the pixel centre, `(col + 0.5, row + 0.5)`
pub fn to_features(grid: &ElevationGrid, lines: Vec<PixelLine>) -> Vec<ContourFeature> {
    let transform = grid.transform();
    lines
        .into_iter()
        .filter(|line| line.points.len() >= 2)
        .map(|line| ContourFeature {
            level: line.level,
            line: LineString::from(
                line.points
                    .iter()
                    .map(|(px, py)| transform.apply(px + 0.5, py + 0.5))
                    .collect::<Vec<Coord<f64>>>(),
            ),
        })
        .collect()
}

#[cfg(feature = "indicatif")]
fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .map(|s| s.progress_chars("##-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("contour levels");
    pb
}

/// Trace every planned level
/// A failing level is recorded in [`ContourTrace::failures`], the others still run
pub fn trace(grid: &ElevationGrid, plan: &ContourPlan) -> ContourTrace {
    #[cfg(feature = "indicatif")]
    let pb = progress_bar(plan.levels.len());

    let trace_level = |level: f64| {
        let result = trace_pixel_lines(grid, level);
        #[cfg(feature = "indicatif")]
        pb.inc(1);
        result
    };

    #[cfg(feature = "rayon")]
    let results: Vec<StageResult<Vec<PixelLine>>> =
        plan.levels.par_iter().map(|&level| trace_level(level)).collect();

    #[cfg(not(feature = "rayon"))]
    let results: Vec<StageResult<Vec<PixelLine>>> =
        plan.levels.iter().map(|&level| trace_level(level)).collect();

    #[cfg(feature = "indicatif")]
    pb.finish_and_clear();

    let mut trace = ContourTrace::default();
    for result in results {
        match result {
            Ok(lines) => trace.features.extend(to_features(grid, lines)),
            Err(e) => {
                warn!("{}", e);
                trace.failures.push(e);
            }
        }
    }
    debug!(
        "Traced {} contour features over {} levels ({} failed)",
        trace.features.len(),
        plan.levels.len(),
        trace.failures.len()
    );
    trace
}

/// Contours as a GeoJSON FeatureCollection with `ID` and `elev` properties
pub fn to_geojson(features: &[ContourFeature], geo_core: &GeoCore) -> GeoJson {
    let mut bbox: Option<BoundingBox> = None;
    let mut out = Vec::with_capacity(features.len());

    for (i, feature) in features.iter().enumerate() {
        if let Some(rect) = feature.line.bounding_rect() {
            match bbox.as_mut() {
                Some(b) => {
                    b.expand(rect.min());
                    b.expand(rect.max());
                }
                None => {
                    bbox = Some(BoundingBox::new(
                        rect.min().x,
                        rect.min().y,
                        rect.max().x,
                        rect.max().y,
                    ))
                }
            }
        }

        let mut properties = Map::new();
        properties.insert("ID".to_string(), json!(i + 1));
        properties.insert("elev".to_string(), json!(feature.level));

        out.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&feature.line))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: bbox.map(|b| b.to_vec()),
        features: out,
        foreign_members: geo_core.crs_member(),
    })
}

/// Write contours to `path` as GeoJSON
pub fn write_geojson(features: &[ContourFeature], geo_core: &GeoCore, path: &Path) -> StageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StageError::output(path, e))?;
    }
    let geojson = to_geojson(features, geo_core);
    std::fs::write(path, geojson.to_string()).map_err(|e| StageError::output(path, e))?;
    debug!("Contours saved to: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LowestLevelPolicy;
    use crate::geo_core::AffineTransform;
    use crate::geometric::contour_plan::plan;
    use approx::assert_relative_eq;

    fn grid(width: usize, height: usize, values: Vec<f64>) -> ElevationGrid {
        ElevationGrid::new(width, height, values, -9999.0, AffineTransform::identity()).unwrap()
    }

    fn peak() -> ElevationGrid {
        #[rustfmt::skip]
        let values = vec![
            0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 5.0, 5.0, 5.0, 0.0,
            0.0, 5.0, 10.0, 5.0, 0.0,
            0.0, 5.0, 5.0, 5.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        grid(5, 5, values)
    }

    #[test]
    fn test_flat_surface_has_no_lines() {
        let g = grid(3, 3, vec![100.0; 9]);
        assert!(trace_pixel_lines(&g, 100.0).unwrap().is_empty());
    }

    #[test]
    fn test_peak_gives_closed_ring() {
        let lines = trace_pixel_lines(&peak(), 7.5).unwrap();
        assert_eq!(lines.len(), 1);
        let ring = &lines[0].points;
        assert_eq!(ring.first(), ring.last());
        // the 7.5 crossing sits halfway between the centre (10) and its neighbours (5)
        for (x, y) in ring {
            let d = ((x - 2.0).abs()).max((y - 2.0).abs());
            assert_relative_eq!(d, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_open_line_on_ramp() {
        // columns 0..4 hold 0, 10, 20, 30
        let values: Vec<f64> = (0..12).map(|i| (i % 4) as f64 * 10.0).collect();
        let lines = trace_pixel_lines(&grid(4, 3, values), 15.0).unwrap();
        assert_eq!(lines.len(), 1);
        let pts = &lines[0].points;
        assert_eq!(pts.len(), 3);
        assert!(pts.iter().all(|(x, _)| (*x - 1.5).abs() < 1e-12));
        let mut ys: Vec<f64> = pts.iter().map(|p| p.1).collect();
        ys.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(ys, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_nodata_blocks_tracing() {
        let mut values: Vec<f64> = (0..12).map(|i| (i % 4) as f64 * 10.0).collect();
        // poison the middle row where the line would pass
        values[5] = -9999.0;
        values[6] = -9999.0;
        let lines = trace_pixel_lines(&grid(4, 3, values), 15.0).unwrap();
        // every block touching row 1 columns 1..2 is skipped
        assert!(lines.is_empty());
    }

    #[test]
    fn test_two_disjoint_components() {
        #[rustfmt::skip]
        let values = vec![
            0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 9.0, 0.0, 9.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let lines = trace_pixel_lines(&grid(5, 3, values), 4.5).unwrap();
        assert_eq!(lines.len(), 2);
        // raster-scan discovery: the left peak first
        assert!(lines[0].points.iter().all(|p| p.0 < 2.0));
        assert!(lines[1].points.iter().all(|p| p.0 > 2.0));
    }

    #[test]
    fn test_saddle_resolved_by_centre() {
        // tl and br high; centre mean 5 >= 4 keeps them connected
        let g = grid(2, 2, vec![10.0, 0.0, 0.0, 10.0]);
        let lines = trace_pixel_lines(&g, 4.0).unwrap();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line.points.len(), 2);
        }
        // centre mean 5 < 6 isolates the high corners instead
        let lines = trace_pixel_lines(&g, 6.0).unwrap();
        assert_eq!(lines.len(), 2);
        let near_tl = lines
            .iter()
            .any(|l| l.points.iter().all(|(x, y)| x + y <= 0.5 + 1e-12));
        assert!(near_tl);
    }

    #[test]
    fn test_block_segments_share_one_buffer() {
        let g = grid(3, 2, vec![10.0, 0.0, 0.0, 0.0, 10.0, 0.0]);
        let mut segments = Vec::new();
        // left block is a saddle (tl, br high), right block a single corner (bl high)
        block_segments(&g, 0, 0, 4.0, &mut segments);
        assert_eq!(segments.len(), 2);
        block_segments(&g, 1, 0, 4.0, &mut segments);
        assert_eq!(segments.len(), 3);
        // a block fully above the level adds nothing
        block_segments(&g, 0, 0, -1.0, &mut segments);
        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[2],
            (
                EdgeKey::Vertical { row: 0, col: 1 },
                EdgeKey::Horizontal { row: 1, col: 1 }
            )
        );
    }

    #[test]
    fn test_non_finite_level_fails() {
        let result = trace_pixel_lines(&peak(), f64::NAN);
        assert!(matches!(result, Err(StageError::Tracing { .. })));
    }

    #[test]
    fn test_trace_continues_after_failed_level() {
        let g = peak();
        let plan = ContourPlan {
            data_min: 0.0,
            data_max: 10.0,
            interval: 1.0,
            levels: vec![2.5, f64::INFINITY, 7.5],
        };
        let trace = trace(&g, &plan);
        assert!(trace.is_partial());
        assert_eq!(trace.failures.len(), 1);
        assert_eq!(trace.features.len(), 2);
        assert_eq!(trace.features[0].level, 2.5);
        assert_eq!(trace.features[1].level, 7.5);
    }

    #[test]
    fn test_features_grouped_by_ascending_level() {
        let g = peak();
        let p = plan(&g, LowestLevelPolicy::Inclusive).unwrap();
        let trace = trace(&g, &p);
        assert!(!trace.is_partial());
        assert!(!trace.features.is_empty());
        assert!(trace.features.windows(2).all(|w| w[0].level <= w[1].level));
        assert!(trace.features.iter().all(|f| f.line.0.len() >= 2));
    }

    #[test]
    fn test_vertices_round_trip_through_transform() {
        let values = peak().values().to_vec();
        let g = ElevationGrid::new(
            5,
            5,
            values,
            -9999.0,
            AffineTransform::new([38.70, 0.00027, 0.0, 9.05, 0.0, -0.00027]),
        )
        .unwrap();
        let lines = trace_pixel_lines(&g, 7.5).unwrap();
        let features = to_features(&g, lines.clone());
        let inverse = g.transform().inverse().unwrap();
        for (line, feature) in lines.iter().zip(&features) {
            assert_eq!(line.points.len(), feature.line.0.len());
            for ((px, py), c) in line.points.iter().zip(feature.line.coords()) {
                let back = inverse.apply(c.x, c.y);
                assert!((back.x - 0.5 - px).abs() < 1.0);
                assert!((back.y - 0.5 - py).abs() < 1.0);
                assert_relative_eq!(back.x - 0.5, *px, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_geojson_properties() {
        let g = peak().with_epsg(Some(32637));
        let p = ContourPlan {
            data_min: 0.0,
            data_max: 10.0,
            interval: 1.0,
            levels: vec![2.5, 7.5],
        };
        let trace = trace(&g, &p);
        let geojson = to_geojson(&trace.features, &g.geo_core);
        let GeoJson::FeatureCollection(fc) = geojson else {
            panic!("expected a FeatureCollection");
        };
        assert_eq!(fc.features.len(), 2);
        let props = fc.features[1].properties.as_ref().unwrap();
        assert_eq!(props["ID"], 2);
        assert_eq!(props["elev"], 7.5);
        assert!(matches!(
            fc.features[0].geometry.as_ref().unwrap().value,
            geojson::Value::LineString(_)
        ));
        assert_eq!(fc.bbox.as_ref().map(|b| b.len()), Some(4));
        let crs = &fc.foreign_members.as_ref().unwrap()["crs"];
        assert_eq!(crs["properties"]["name"], "urn:ogc:def:crs:EPSG::32637");
    }
}
