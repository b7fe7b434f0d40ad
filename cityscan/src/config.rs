use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::commons::basic_functions::city_slug;

/// Default root of the per-city directory tree
pub const DATA_ROOT: &str = "mnt/city-directories";

/// No-data marker used when the raster does not declare one
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Where the lowest contour level starts when `floor(min / interval) * interval`
/// lies below the data minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowestLevelPolicy {
    /// Keep the floored level, it brackets the data from below
    #[default]
    Inclusive,
    /// Skip the floored level, the first contour lies inside the data range
    AboveMinimum,
}

/// Everything the contour / elevation statistics stage needs for one city.
/// The core components never read this, the stage hands them plain values.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// City name as written in the city inputs ("Cox's Bazar")
    pub city_name: String,
    /// Root of the per-city directory tree
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Menu flag for the whole raster processing group
    #[serde(default = "default_enabled")]
    pub raster_processing: bool,
    /// Menu flag for the elevation outputs
    #[serde(default = "default_enabled")]
    pub elevation: bool,
    #[serde(default)]
    pub lowest_level: LowestLevelPolicy,
    /// No-data marker used when the raster has no GDAL_NODATA tag
    #[serde(default = "default_nodata")]
    pub nodata_fallback: f64,
}

fn default_data_root() -> PathBuf {
    PathBuf::from(DATA_ROOT)
}

fn default_enabled() -> bool {
    true
}

fn default_nodata() -> f64 {
    DEFAULT_NODATA
}

impl StageConfig {
    pub fn new(city_name: impl Into<String>, data_root: impl Into<PathBuf>) -> Self {
        StageConfig {
            city_name: city_name.into(),
            data_root: data_root.into(),
            raster_processing: true,
            elevation: true,
            lowest_level: LowestLevelPolicy::default(),
            nodata_fallback: DEFAULT_NODATA,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StageConfig =
            serde_yaml::from_str(yaml).context("Failed to parse stage configuration")?;
        if config.city_name.trim().is_empty() {
            anyhow::bail!("city_name must not be empty");
        }
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {:?}", path))?;
        Self::from_yaml_str(&yaml)
    }

    /// The stage runs only when both menu flags are set
    pub fn is_enabled(&self) -> bool {
        self.raster_processing && self.elevation
    }

    pub fn city_slug(&self) -> String {
        city_slug(&self.city_name)
    }

    /// `<root>/<slug>/02-process-output`
    pub fn output_folder(&self) -> PathBuf {
        self.data_root
            .join(self.city_slug())
            .join("02-process-output")
    }

    pub fn spatial_folder(&self) -> PathBuf {
        self.output_folder().join("spatial")
    }

    pub fn tabular_folder(&self) -> PathBuf {
        self.output_folder().join("tabular")
    }

    pub fn elevation_raster_path(&self) -> PathBuf {
        self.spatial_folder()
            .join(format!("{}_elevation.tif", self.city_slug()))
    }

    pub fn contours_path(&self) -> PathBuf {
        self.spatial_folder()
            .join(format!("{}_contours.geojson", self.city_slug()))
    }

    pub fn elevation_stats_path(&self) -> PathBuf {
        self.tabular_folder()
            .join(format!("{}_elevation.csv", self.city_slug()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_yaml() {
        let config = StageConfig::from_yaml_str("city_name: Cox's Bazar\n").unwrap();
        assert_eq!(config.city_slug(), "coxs_bazar");
        assert!(config.raster_processing && config.elevation);
        assert!(config.is_enabled());
        assert_eq!(config.lowest_level, LowestLevelPolicy::Inclusive);
        assert_eq!(config.nodata_fallback, -9999.0);
        assert_eq!(config.data_root, PathBuf::from(DATA_ROOT));
    }

    #[test]
    fn test_overrides_from_yaml() {
        let yaml = "city_name: Lima\ndata_root: /data/cities\nelevation: false\nlowest_level: above_minimum\nnodata_fallback: -32768\n";
        let config = StageConfig::from_yaml_str(yaml).unwrap();
        assert!(config.raster_processing);
        assert!(!config.elevation);
        assert!(!config.is_enabled());
        assert_eq!(config.lowest_level, LowestLevelPolicy::AboveMinimum);
        assert_eq!(config.nodata_fallback, -32768.0);
        assert_eq!(
            config.elevation_raster_path(),
            PathBuf::from("/data/cities/lima/02-process-output/spatial/lima_elevation.tif")
        );
    }

    #[test]
    fn test_either_menu_flag_disables() {
        let base = "city_name: Lima\n";
        for (flags, enabled) in [
            ("", true),
            ("raster_processing: false\n", false),
            ("elevation: false\n", false),
            ("raster_processing: false\nelevation: false\n", false),
        ] {
            let config = StageConfig::from_yaml_str(&format!("{}{}", base, flags)).unwrap();
            assert_eq!(config.is_enabled(), enabled, "{:?}", flags);
        }
    }

    #[test]
    fn test_empty_city_rejected() {
        assert!(StageConfig::from_yaml_str("city_name: '  '\n").is_err());
        assert!(StageConfig::from_yaml_str("elevation: true\n").is_err());
    }

    #[test]
    fn test_output_paths() {
        let config = StageConfig::new("Addis Ababa", "root");
        assert_eq!(
            config.contours_path(),
            PathBuf::from("root/addis_ababa/02-process-output/spatial/addis_ababa_contours.geojson")
        );
        assert_eq!(
            config.elevation_stats_path(),
            PathBuf::from("root/addis_ababa/02-process-output/tabular/addis_ababa_elevation.csv")
        );
    }
}
