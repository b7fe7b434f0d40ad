use geo::Coord;
use serde_json::{json, Map, Value};

/// Pixel to geographic mapping, GDAL coefficient order:
/// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`
///
/// `x = c0 + col * c1 + row * c2`, `y = c3 + col * c4 + row * c5`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub coefficients: [f64; 6],
}

impl AffineTransform {
    pub fn new(coefficients: [f64; 6]) -> Self {
        AffineTransform { coefficients }
    }

    /// Pixel grid with origin (0, 0) and unit pixels, y growing with the row
    pub fn identity() -> Self {
        AffineTransform::new([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    /// North-up transform from an upper-left corner and a pixel size
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_size_x: f64, pixel_size_y: f64) -> Self {
        AffineTransform::new([origin_x, pixel_size_x, 0.0, origin_y, 0.0, -pixel_size_y])
    }

    /// Map a (possibly fractional) pixel position to geographic coordinates
    pub fn apply(&self, col: f64, row: f64) -> Coord<f64> {
        let c = &self.coefficients;
        Coord {
            x: c[0] + col * c[1] + row * c[2],
            y: c[3] + col * c[4] + row * c[5],
        }
    }

    /// Inverse mapping (geographic -> pixel), None for a singular transform
    pub fn inverse(&self) -> Option<AffineTransform> {
        let c = &self.coefficients;
        let det = c[1] * c[5] - c[2] * c[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = c[5] / det;
        let b = -c[2] / det;
        let d = -c[4] / det;
        let e = c[1] / det;
        Some(AffineTransform::new([
            -(a * c[0] + b * c[3]),
            a,
            b,
            -(d * c[0] + e * c[3]),
            d,
            e,
        ]))
    }

    /// Extent covered by a `width` x `height` grid under this transform
    pub fn extent(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width as f64, 0.0),
            self.apply(0.0, height as f64),
            self.apply(width as f64, height as f64),
        ];
        let mut bbox = BoundingBox::new(corners[0].x, corners[0].y, corners[0].x, corners[0].y);
        for corner in &corners[1..] {
            bbox.expand(*corner);
        }
        bbox
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        AffineTransform::identity()
    }
}

/// CRS bookkeeping for outputs
/// Contours are written in the CRS of the source raster, no reprojection happens
#[derive(Debug, Clone, Default)]
pub struct GeoCore {
    /// EPSG code of the source raster, when its GeoKeys declare one
    pub epsg: Option<u32>,
}

impl GeoCore {
    pub fn new(epsg: Option<u32>) -> Self {
        GeoCore { epsg }
    }

    pub fn get_epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// OGC URN for the CRS, e.g. `urn:ogc:def:crs:EPSG::32633`
    pub fn crs_urn(&self) -> Option<String> {
        self.epsg.map(|code| format!("urn:ogc:def:crs:EPSG::{}", code))
    }

    /// Named `crs` member for a GeoJSON FeatureCollection
    pub fn crs_member(&self) -> Option<Map<String, Value>> {
        let urn = self.crs_urn()?;
        let mut members = Map::new();
        members.insert(
            "crs".to_string(),
            json!({ "type": "name", "properties": { "name": urn } }),
        );
        Some(members)
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn expand(&mut self, coord: Coord<f64>) {
        self.min_x = self.min_x.min(coord.x);
        self.min_y = self.min_y.min(coord.y);
        self.max_x = self.max_x.max(coord.x);
        self.max_y = self.max_y.max(coord.y);
    }

    /// GeoJSON `bbox` member order
    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_apply_north_up() {
        let t = AffineTransform::north_up(500_000.0, 4_000_000.0, 30.0, 30.0);
        let c = t.apply(2.0, 3.0);
        assert_relative_eq!(c.x, 500_060.0);
        assert_relative_eq!(c.y, 3_999_910.0);
    }

    #[test]
    fn test_inverse_round_trip_with_rotation() {
        let t = AffineTransform::new([100.0, 2.0, 0.5, 50.0, 0.25, -3.0]);
        let inv = t.inverse().unwrap();
        let geo = t.apply(7.25, 4.5);
        let back = inv.apply(geo.x, geo.y);
        assert_relative_eq!(back.x, 7.25, epsilon = 1e-9);
        assert_relative_eq!(back.y, 4.5, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_transform_has_no_inverse() {
        let t = AffineTransform::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_extent() {
        let t = AffineTransform::north_up(10.0, 20.0, 1.0, 1.0);
        let bbox = t.extent(4, 2);
        assert_eq!(bbox, BoundingBox::new(10.0, 18.0, 14.0, 20.0));
    }

    #[test]
    fn test_crs_member() {
        let gc = GeoCore::new(Some(4326));
        let members = gc.crs_member().unwrap();
        assert_eq!(
            members["crs"]["properties"]["name"],
            "urn:ogc:def:crs:EPSG::4326"
        );
        assert!(GeoCore::default().crs_member().is_none());
    }
}
