use anyhow::Result;
use serde::{Deserialize, Serialize};

/// (longitude, latitude) in WGS84 degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub lon: f64,
    pub lat: f64,
}

impl GeoCoordinate {
    pub fn new(lon: f64, lat: f64) -> GeoCoordinate {
        GeoCoordinate { lon, lat }
    }
}

/// Meters per degree at a given latitude, the cheap spherical approximation. Good to well under
/// a percent at roundabout scale.
pub fn meters_per_degree(lat: f64) -> (f64, f64) {
    (111_320.0 * lat.to_radians().cos(), 110_574.0)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl GeoBoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<GeoBoundingBox> {
        if max_lon <= min_lon || max_lat <= min_lat {
            bail!("empty bounding box: lon [{min_lon}, {max_lon}], lat [{min_lat}, {max_lat}]");
        }
        Ok(GeoBoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn contains(&self, pt: GeoCoordinate) -> bool {
        pt.lon >= self.min_lon
            && pt.lon <= self.max_lon
            && pt.lat >= self.min_lat
            && pt.lat <= self.max_lat
    }
}

/// The six-element GeoTIFF affine: `[ox, a, b, oy, c, d]`, mapping pixel (px, py) to
/// `x = ox + a*px + b*py`, `y = oy + c*px + d*py`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Geotransform {
    origin_x: f64,
    a: f64,
    b: f64,
    origin_y: f64,
    c: f64,
    d: f64,
}

impl Geotransform {
    pub fn new(coefficients: [f64; 6]) -> Result<Geotransform> {
        let [origin_x, a, b, origin_y, c, d] = coefficients;
        if (a * d - b * c).abs() < 1e-18 {
            bail!("geotransform is singular");
        }
        Ok(Geotransform {
            origin_x,
            a,
            b,
            origin_y,
            c,
            d,
        })
    }

    pub fn pixel_to_projected(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.origin_x + self.a * px + self.b * py,
            self.origin_y + self.c * px + self.d * py,
        )
    }

    /// Inverse affine, projected coordinates to a continuous pixel coordinate.
    pub fn projected_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.a * self.d - self.b * self.c;
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;
        (
            (self.d * dx - self.b * dy) / det,
            (self.a * dy - self.c * dx) / det,
        )
    }
}

/// Geodetic to the raster's projected CRS. Injected so the core stays free of any projection
/// library; rasters stored in geographic coordinates just use `IdentityProjection`.
pub trait Projection {
    fn geo_to_projected(&self, lon: f64, lat: f64) -> (f64, f64);
    fn projected_to_geo(&self, x: f64, y: f64) -> (f64, f64);
}

/// For rasters whose projected CRS is geographic degrees already (EPSG:4326 GeoTIFFs).
pub struct IdentityProjection;

impl Projection for IdentityProjection {
    fn geo_to_projected(&self, lon: f64, lat: f64) -> (f64, f64) {
        (lon, lat)
    }

    fn projected_to_geo(&self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }
}

enum Mode {
    /// Geotransform of the source raster, with GeoTIFF's top-left pixel origin, plus the crop
    /// offset applied when only a window of the raster became the terrain.
    Projected {
        geotransform: Geotransform,
        projection: Box<dyn Projection>,
        crop_offset: (f64, f64),
    },
    /// Normalize against the bounding box. Exact only for unrotated axis-aligned extents.
    Linear,
}

/// Maps (lon, lat) to terrain pixels. Two conventions are exposed: `to_terrain_pixel` has its
/// origin bottom-left with Y increasing north (multiply by meters-per-pixel for spline space),
/// `to_image_pixel` is top-left with Y inverted, for raster output.
pub struct CoordinateTransformer {
    bounds: GeoBoundingBox,
    terrain_size: usize,
    mode: Mode,
}

impl CoordinateTransformer {
    pub fn linear(bounds: GeoBoundingBox, terrain_size: usize) -> CoordinateTransformer {
        CoordinateTransformer {
            bounds,
            terrain_size,
            mode: Mode::Linear,
        }
    }

    pub fn projected(
        bounds: GeoBoundingBox,
        terrain_size: usize,
        geotransform: Geotransform,
        projection: Box<dyn Projection>,
        crop_offset: (f64, f64),
    ) -> CoordinateTransformer {
        CoordinateTransformer {
            bounds,
            terrain_size,
            mode: Mode::Projected {
                geotransform,
                projection,
                crop_offset,
            },
        }
    }

    pub fn bounds(&self) -> &GeoBoundingBox {
        &self.bounds
    }

    pub fn terrain_size(&self) -> usize {
        self.terrain_size
    }

    /// Bottom-left origin, Y increases north.
    pub fn to_terrain_pixel(&self, pt: GeoCoordinate) -> (f64, f64) {
        let (x, y) = self.to_image_pixel(pt);
        (x, self.terrain_size as f64 - y)
    }

    /// Top-left origin, Y inverted, for raster output.
    pub fn to_image_pixel(&self, pt: GeoCoordinate) -> (f64, f64) {
        match &self.mode {
            Mode::Projected {
                geotransform,
                projection,
                crop_offset,
            } => {
                let (x, y) = projection.geo_to_projected(pt.lon, pt.lat);
                let (px, py) = geotransform.projected_to_pixel(x, y);
                (px - crop_offset.0, py - crop_offset.1)
            }
            Mode::Linear => {
                let nx = (pt.lon - self.bounds.min_lon) / self.bounds.width();
                let ny = (pt.lat - self.bounds.min_lat) / self.bounds.height();
                (
                    nx * self.terrain_size as f64,
                    (1.0 - ny) * self.terrain_size as f64,
                )
            }
        }
    }

    /// Inverse of `to_terrain_pixel`.
    pub fn terrain_pixel_to_geo(&self, x: f64, y: f64) -> GeoCoordinate {
        self.image_pixel_to_geo(x, self.terrain_size as f64 - y)
    }

    /// Inverse of `to_image_pixel`.
    pub fn image_pixel_to_geo(&self, x: f64, y: f64) -> GeoCoordinate {
        match &self.mode {
            Mode::Projected {
                geotransform,
                projection,
                crop_offset,
            } => {
                let (px, py) = (x + crop_offset.0, y + crop_offset.1);
                let (gx, gy) = geotransform.pixel_to_projected(px, py);
                let (lon, lat) = projection.projected_to_geo(gx, gy);
                GeoCoordinate::new(lon, lat)
            }
            Mode::Linear => {
                let nx = x / self.terrain_size as f64;
                let ny = 1.0 - y / self.terrain_size as f64;
                GeoCoordinate::new(
                    self.bounds.min_lon + nx * self.bounds.width(),
                    self.bounds.min_lat + ny * self.bounds.height(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> GeoBoundingBox {
        GeoBoundingBox::new(10.0, 50.0, 10.2, 50.1).unwrap()
    }

    #[test]
    fn rejects_empty_bounds() {
        assert!(GeoBoundingBox::new(10.0, 50.0, 10.0, 50.1).is_err());
        assert!(GeoBoundingBox::new(10.0, 50.1, 10.2, 50.0).is_err());
    }

    #[test]
    fn linear_corners() {
        let t = CoordinateTransformer::linear(bounds(), 1024);
        let (x, y) = t.to_terrain_pixel(GeoCoordinate::new(10.0, 50.0));
        assert!((x, y) == (0.0, 0.0));
        let (x, y) = t.to_image_pixel(GeoCoordinate::new(10.0, 50.0));
        assert!((x, y) == (0.0, 1024.0));
        let (x, y) = t.to_terrain_pixel(GeoCoordinate::new(10.2, 50.1));
        assert!((x - 1024.0).abs() < 1e-9 && (y - 1024.0).abs() < 1e-9);
    }

    #[test]
    fn linear_round_trip() {
        let t = CoordinateTransformer::linear(bounds(), 2048);
        // A grid of interior points survives the round trip to within 1e-6 degrees
        for i in 1..10 {
            for j in 1..10 {
                let pt = GeoCoordinate::new(10.0 + 0.02 * i as f64, 50.0 + 0.01 * j as f64);
                let (x, y) = t.to_terrain_pixel(pt);
                let back = t.terrain_pixel_to_geo(x, y);
                assert!((back.lon - pt.lon).abs() < 1e-6);
                assert!((back.lat - pt.lat).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn projected_round_trip() {
        // A north-up raster over the same extent: 0.0002 degrees per pixel in x, -0.0001 in y
        let gt = Geotransform::new([10.0, 0.2 / 1024.0, 0.0, 50.1, 0.0, -0.1 / 1024.0]).unwrap();
        let t = CoordinateTransformer::projected(
            bounds(),
            1024,
            gt,
            Box::new(IdentityProjection),
            (0.0, 0.0),
        );
        let pt = GeoCoordinate::new(10.05, 50.07);
        let (x, y) = t.to_image_pixel(pt);
        let back = t.image_pixel_to_geo(x, y);
        assert!((back.lon - pt.lon).abs() < 1e-9);
        assert!((back.lat - pt.lat).abs() < 1e-9);
        // Top-left corner of the raster is pixel (0, 0)
        let (x, y) = t.to_image_pixel(GeoCoordinate::new(10.0, 50.1));
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);
    }

    #[test]
    fn crop_offset_shifts_pixels() {
        let gt = Geotransform::new([10.0, 0.2 / 1024.0, 0.0, 50.1, 0.0, -0.1 / 1024.0]).unwrap();
        let t = CoordinateTransformer::projected(
            bounds(),
            512,
            gt,
            Box::new(IdentityProjection),
            (100.0, 200.0),
        );
        let (x, y) = t.to_image_pixel(GeoCoordinate::new(10.0, 50.1));
        assert!((x + 100.0).abs() < 1e-9);
        assert!((y + 200.0).abs() < 1e-9);
    }
}
