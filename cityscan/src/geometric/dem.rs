use log::{debug, warn};
use std::path::Path;

use crate::error::{StageError, StageResult};
use crate::geo_core::{AffineTransform, BoundingBox, GeoCore};

/// Single-band elevation raster held in memory
/// Values are row-major, `values[row * width + col]`
#[derive(Debug, Clone)]
pub struct ElevationGrid {
    width: usize,
    height: usize,
    values: Vec<f64>,
    no_data: f64,
    transform: AffineTransform,
    /// CRS of the source raster
    pub geo_core: GeoCore,
}

impl ElevationGrid {
    pub fn new(
        width: usize,
        height: usize,
        values: Vec<f64>,
        no_data: f64,
        transform: AffineTransform,
    ) -> StageResult<Self> {
        let expected = width.checked_mul(height).unwrap_or(usize::MAX);
        if values.len() != expected {
            return Err(StageError::raster_read(
                "<memory>",
                format!(
                    "expected {} samples for {}x{} grid, got {}",
                    expected,
                    width,
                    height,
                    values.len()
                ),
            ));
        }
        Ok(ElevationGrid {
            width,
            height,
            values,
            no_data,
            transform,
            geo_core: GeoCore::default(),
        })
    }

    pub fn with_epsg(mut self, epsg: Option<u32>) -> Self {
        self.geo_core = GeoCore::new(epsg);
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn no_data(&self) -> f64 {
        self.no_data
    }

    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, col: usize, row: usize) -> f64 {
        self.values[row * self.width + col]
    }

    /// False for the no-data marker, NaN and infinities
    pub fn is_valid(&self, value: f64) -> bool {
        value.is_finite() && value != self.no_data
    }

    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied().filter(|v| self.is_valid(*v))
    }

    /// `(min, max)` over valid cells, None when every cell is no-data
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.valid_values().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    pub fn extent(&self) -> BoundingBox {
        self.transform.extent(self.width, self.height)
    }
}

/// Open the elevation raster at `path`
/// A missing file is reported as [`StageError::MissingInput`], anything else
/// that prevents decoding as [`StageError::RasterRead`]
pub fn load(path: &Path, nodata_fallback: f64) -> StageResult<ElevationGrid> {
    if !path.exists() {
        return Err(StageError::MissingInput {
            path: path.to_path_buf(),
        });
    }

    #[cfg(feature = "gdal")]
    let grid = gdal_reader::read(path, nodata_fallback)?;

    #[cfg(not(feature = "gdal"))]
    let grid = tiff_reader::read(path, nodata_fallback)?;

    debug!(
        "Loaded {}x{} elevation grid from {:?} (no-data {}, EPSG {:?}, extent {:?})",
        grid.width,
        grid.height,
        path,
        grid.no_data,
        grid.geo_core.get_epsg(),
        grid.extent()
    );
    Ok(grid)
}

/// Round the no-data marker to the precision the samples are stored in
/// Float32 cells widen to the f32 nearest the marker, never to the parsed f64.
/// Integer samples widen exactly and keep the marker as parsed.
fn marker_for_samples(no_data: f64, single_precision: bool) -> f64 {
    if single_precision && no_data.is_finite() {
        no_data as f32 as f64
    } else {
        no_data
    }
}

/// Parse a GDAL_NODATA string, falling back when it is absent or garbage
#[cfg_attr(feature = "gdal", allow(dead_code))]
fn resolve_nodata(raw: Option<&str>, fallback: f64) -> f64 {
    match raw.map(|s| s.trim_matches(char::from(0)).trim()) {
        Some(s) if !s.is_empty() => match s.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring unparseable no-data value {:?}, using {}", s, fallback);
                fallback
            }
        },
        _ => fallback,
    }
}

/// Affine transform from GeoTIFF model tags
/// ModelTransformation wins over tiepoint + pixel scale, like GDAL does
#[cfg_attr(feature = "gdal", allow(dead_code))]
fn transform_from_tags(
    model_transformation: Option<&[f64]>,
    tiepoint: Option<&[f64]>,
    pixel_scale: Option<&[f64]>,
) -> Option<AffineTransform> {
    if let Some(m) = model_transformation {
        if m.len() >= 16 {
            return Some(AffineTransform::new([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }
    match (tiepoint, pixel_scale) {
        (Some(tp), Some(scale)) if tp.len() >= 6 && scale.len() >= 2 => {
            let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
            let (sx, sy) = (scale[0], scale[1]);
            Some(AffineTransform::new([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
        }
        _ => None,
    }
}

/// EPSG code from a GeoKeyDirectory (projected CRS first, then geographic)
#[cfg_attr(feature = "gdal", allow(dead_code))]
fn epsg_from_geokeys(keys: &[u32]) -> Option<u32> {
    const PROJECTED_CS_TYPE: u32 = 3072;
    const GEOGRAPHIC_TYPE: u32 = 2048;
    // user-defined / undefined codes
    const USER_DEFINED: u32 = 32767;

    if keys.len() < 4 {
        return None;
    }
    let entries: Vec<&[u32]> = keys[4..].chunks_exact(4).collect();
    let lookup = |id: u32| {
        entries
            .iter()
            .find(|e| e[0] == id && e[1] == 0)
            .map(|e| e[3])
            .filter(|code| *code != 0 && *code != USER_DEFINED)
    };
    lookup(PROJECTED_CS_TYPE).or_else(|| lookup(GEOGRAPHIC_TYPE))
}

#[cfg(not(feature = "gdal"))]
mod tiff_reader {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    use log::warn;
    use tiff::decoder::{Decoder, DecodingResult, Limits};
    use tiff::tags::Tag;
    use tiff::ColorType;

    use super::{
        epsg_from_geokeys, marker_for_samples, resolve_nodata, transform_from_tags, ElevationGrid,
    };
    use crate::error::{StageError, StageResult};
    use crate::geo_core::AffineTransform;

    pub(super) fn read(path: &Path, nodata_fallback: f64) -> StageResult<ElevationGrid> {
        let err = |e: tiff::TiffError| StageError::raster_read(path, e);

        let file = File::open(path).map_err(|e| StageError::raster_read(path, e))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(err)?
            .with_limits(Limits::unlimited());

        let colortype = decoder.colortype().map_err(err)?;
        if !matches!(colortype, ColorType::Gray(_)) {
            return Err(StageError::raster_read(
                path,
                format!("expected a single-band raster, found {:?}", colortype),
            ));
        }

        let (width, height) = decoder.dimensions().map_err(err)?;

        let model_transformation = find_f64_vec(&mut decoder, Tag::ModelTransformationTag);
        let tiepoint = find_f64_vec(&mut decoder, Tag::ModelTiepointTag);
        let pixel_scale = find_f64_vec(&mut decoder, Tag::ModelPixelScaleTag);
        let nodata = decoder
            .find_tag(Tag::GdalNodata)
            .ok()
            .flatten()
            .and_then(|v| v.into_string().ok());
        let geokeys = decoder
            .find_tag(Tag::GeoKeyDirectoryTag)
            .ok()
            .flatten()
            .and_then(|v| v.into_u32_vec().ok());

        let transform = transform_from_tags(
            model_transformation.as_deref(),
            tiepoint.as_deref(),
            pixel_scale.as_deref(),
        )
        .unwrap_or_else(|| {
            warn!(
                "{:?} carries no GeoTIFF georeferencing, using pixel coordinates",
                path
            );
            AffineTransform::identity()
        });

        let decoded = decoder.read_image().map_err(err)?;
        let single_precision = matches!(decoded, DecodingResult::F32(_));
        let values = match decoded {
            DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::F64(v) => v,
            _ => {
                return Err(StageError::raster_read(path, "unsupported sample format"));
            }
        };

        let no_data = marker_for_samples(
            resolve_nodata(nodata.as_deref(), nodata_fallback),
            single_precision,
        );
        let grid = ElevationGrid::new(width as usize, height as usize, values, no_data, transform)
            .map_err(|e| StageError::raster_read(path, e))?;
        Ok(grid.with_epsg(geokeys.as_deref().and_then(epsg_from_geokeys)))
    }

    fn find_f64_vec(decoder: &mut Decoder<BufReader<File>>, tag: Tag) -> Option<Vec<f64>> {
        decoder
            .find_tag(tag)
            .ok()
            .flatten()
            .and_then(|v| v.into_f64_vec().ok())
    }
}

#[cfg(feature = "gdal")]
mod gdal_reader {
    use gdal::raster::GdalDataType;
    use gdal::Dataset;
    use std::path::Path;

    use super::{marker_for_samples, ElevationGrid};
    use crate::error::{StageError, StageResult};
    use crate::geo_core::AffineTransform;

    pub(super) fn read(path: &Path, nodata_fallback: f64) -> StageResult<ElevationGrid> {
        let err = |e: gdal::errors::GdalError| StageError::raster_read(path, e);

        // Dataset is dropped (closed) when this function returns
        let dataset = Dataset::open(path).map_err(err)?;
        let (width, height) = dataset.raster_size();
        let band = dataset.rasterband(1).map_err(err)?;
        let buffer = band
            .read_as::<f64>((0, 0), (width, height), (width, height), None)
            .map_err(err)?;
        let geo_transform = dataset.geo_transform().map_err(err)?;
        let no_data = marker_for_samples(
            band.no_data_value().unwrap_or(nodata_fallback),
            band.band_type() == GdalDataType::Float32,
        );
        let epsg = dataset
            .spatial_ref()
            .ok()
            .and_then(|srs| srs.auth_code().ok())
            .and_then(|code| u32::try_from(code).ok());

        let (_, values) = buffer.into_shape_and_vec();
        let grid = ElevationGrid::new(
            width,
            height,
            values,
            no_data,
            AffineTransform::new(geo_transform),
        )
        .map_err(|e| StageError::raster_read(path, e))?;
        Ok(grid.with_epsg(epsg))
    }
}
