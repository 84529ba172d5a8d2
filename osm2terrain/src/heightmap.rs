use anyhow::Result;

use crate::geometry::Vec2;

/// Elevations in meters above the terrain base, row-major `[y][x]`, origin bottom-left. Decoded
/// from GeoTIFF/XYZ/PNG by the importer; the pipeline only reads it.
#[derive(Clone, Debug)]
pub struct Heightmap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Heightmap {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Heightmap> {
        if data.len() != width * height {
            bail!(
                "heightmap data length {} doesn't match {}x{}",
                data.len(),
                width,
                height
            );
        }
        Ok(Heightmap {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear interpolation at a continuous pixel coordinate, clamped to the raster bounds.
    pub fn sample_bilinear(&self, fx: f64, fy: f64) -> f64 {
        let fx = fx.clamp(0.0, (self.width - 1) as f64);
        let fy = fy.clamp(0.0, (self.height - 1) as f64);
        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;
        let top = self.get(x0, y0) as f64 * (1.0 - tx) + self.get(x1, y0) as f64 * tx;
        let bottom = self.get(x0, y1) as f64 * (1.0 - tx) + self.get(x1, y1) as f64 * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// Sample at a terrain-meter position (bottom-left origin, same convention as the raster).
    pub fn sample_at_meters(&self, p: Vec2, meters_per_pixel: f64) -> f64 {
        self.sample_bilinear(p.x / meters_per_pixel, p.y / meters_per_pixel)
    }
}
