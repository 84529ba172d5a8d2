use crate::geometry::Vec2;
use crate::raster::bresenham_line;
use crate::roundabout::ProcessedRoundaboutInfo;
use crate::AnnotatedRoadSpline;

pub type Rgba = [u8; 4];

const ORIGINAL_GRAY: Rgba = [128, 128, 128, 90];
const TRIMMED_RED: Rgba = [255, 0, 0, 255];
const ROAD_CYAN: Rgba = [0, 255, 255, 255];
const RING_YELLOW: Rgba = [255, 255, 0, 255];
const CONNECTION_GREEN: Rgba = [0, 200, 0, 255];
const OUTLINE_WHITE: Rgba = [255, 255, 255, 255];
const CENTER_MAGENTA: Rgba = [255, 0, 255, 255];

/// A square 32-bit RGBA canvas for the debug overlay. Row-major, top-left origin, 4 bytes per
/// pixel. PNG encoding happens outside the pipeline.
#[derive(Clone, Debug)]
pub struct RgbaImage {
    size: usize,
    data: Vec<u8>,
}

impl RgbaImage {
    pub fn new(size: usize) -> RgbaImage {
        RgbaImage {
            size,
            data: vec![0; size * size * 4],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> Rgba {
        let i = (y * self.size + x) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn set(&mut self, x: i64, y: i64, color: Rgba) {
        if x < 0 || y < 0 || x as usize >= self.size || y as usize >= self.size {
            return;
        }
        let i = (y as usize * self.size + x as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&color);
    }

    /// Source-over blend using the color's own alpha.
    pub fn blend(&mut self, x: i64, y: i64, color: Rgba) {
        if x < 0 || y < 0 || x as usize >= self.size || y as usize >= self.size {
            return;
        }
        let i = (y as usize * self.size + x as usize) * 4;
        let a = color[3] as u32;
        for c in 0..3 {
            let dst = self.data[i + c] as u32;
            self.data[i + c] = ((color[c] as u32 * a + dst * (255 - a)) / 255) as u8;
        }
        self.data[i + 3] = self.data[i + 3].max(color[3]);
    }
}

struct Canvas<'a> {
    image: &'a mut RgbaImage,
    meters_per_pixel: f64,
}

impl Canvas<'_> {
    fn to_image(&self, p: Vec2) -> (i64, i64) {
        let size = self.image.size as f64;
        (
            (p.x / self.meters_per_pixel).round() as i64,
            (size - p.y / self.meters_per_pixel).round() as i64,
        )
    }

    fn polyline(&mut self, points: &[Vec2], color: Rgba, blend: bool) {
        for w in points.windows(2) {
            let (x0, y0) = self.to_image(w[0]);
            let (x1, y1) = self.to_image(w[1]);
            bresenham_line(x0, y0, x1, y1, |x, y| {
                if blend {
                    self.image.blend(x, y, color);
                } else {
                    self.image.set(x, y, color);
                }
            });
        }
    }

    fn disc(&mut self, center: Vec2, radius: i64, fill: Rgba, outline: Rgba) {
        let (cx, cy) = self.to_image(center);
        for dy in -(radius + 1)..=(radius + 1) {
            for dx in -(radius + 1)..=(radius + 1) {
                let d2 = dx * dx + dy * dy;
                if d2 <= radius * radius {
                    self.image.set(cx + dx, cy + dy, fill);
                } else if d2 <= (radius + 1) * (radius + 1) {
                    self.image.set(cx + dx, cy + dy, outline);
                }
            }
        }
    }

    fn crosshair(&mut self, center: Vec2, arm: i64, color: Rgba) {
        let (cx, cy) = self.to_image(center);
        for d in -arm..=arm {
            self.image.set(cx + d, cy, color);
            self.image.set(cx, cy + d, color);
        }
    }
}

/// Paint the whole conversion onto one image: faint original OSM paths underneath, trimmed
/// pieces in red, final road splines in cyan, roundabout rings in yellow with green connection
/// dots and a magenta center crosshair.
pub fn render_debug(
    size: usize,
    meters_per_pixel: f64,
    original_paths: &[Vec<Vec2>],
    trimmed_segments: &[Vec<Vec2>],
    splines: &[AnnotatedRoadSpline],
    roundabouts: &[ProcessedRoundaboutInfo],
) -> RgbaImage {
    let mut image = RgbaImage::new(size);
    let mut canvas = Canvas {
        image: &mut image,
        meters_per_pixel,
    };

    for path in original_paths {
        canvas.polyline(path, ORIGINAL_GRAY, true);
    }
    for segment in trimmed_segments {
        canvas.polyline(segment, TRIMMED_RED, false);
    }

    for spline in splines {
        let color = if spline.is_roundabout() {
            RING_YELLOW
        } else {
            ROAD_CYAN
        };
        let points: Vec<Vec2> = spline
            .spline
            .sample_by_interval(meters_per_pixel.max(0.5))
            .into_iter()
            .map(|s| s.position)
            .collect();
        canvas.polyline(&points, color, false);
    }

    for rb in roundabouts {
        for conn in &rb.connections {
            canvas.disc(conn.point, 2, CONNECTION_GREEN, OUTLINE_WHITE);
        }
        canvas.crosshair(rb.center, 4, CENTER_MAGENTA);
    }

    image
}
