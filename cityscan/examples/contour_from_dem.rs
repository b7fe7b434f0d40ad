use anyhow::Result;
use cityscan::{ContourElevStats, StageConfig, StageStatus};
use std::path::PathBuf;

/// Example: contour lines and elevation statistics for one city
///
/// Usage: cargo run --example contour_from_dem -- [config.yml]
///
/// The configuration file looks like:
///
/// ```yaml
/// city_name: Cox's Bazar
/// data_root: mnt/city-directories
/// lowest_level: inclusive
/// ```
///
/// Without an argument the stage runs for "Cox's Bazar" under the default data root.
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Example: Contour lines and elevation stats from DEM ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => StageConfig::from_yaml_file(&PathBuf::from(path))?,
        None => StageConfig::new("Cox's Bazar", cityscan::config::DATA_ROOT),
    };

    println!("City: {}", config.city_name);
    println!("  - Elevation raster: {:?}", config.elevation_raster_path());
    println!("  - Lowest level policy: {:?}\n", config.lowest_level);

    let report = ContourElevStats::new(config).run();

    println!("\nStage finished: {:?}", report.status);
    if let Some(path) = &report.contours_path {
        println!("  - Contours: {:?} ({} features)", path, report.feature_count);
    }
    if let Some(histogram) = &report.histogram {
        for bin in &histogram.bins {
            println!("  - {:>12} m: {} cells", bin.label, bin.count);
        }
    }
    if let Some(path) = &report.stats_path {
        println!("  - Elevation stats: {:?}", path);
    }
    for failure in &report.failures {
        println!("  ! {}", failure);
    }

    if report.status == StageStatus::Failed {
        anyhow::bail!("contour / elevation stats stage failed");
    }
    Ok(())
}
