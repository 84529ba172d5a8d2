use itertools::Itertools;

use crate::geometry::{RoadSpline, Vec2};

/// A square 8-bit layer mask, indexed `[y][x]` with the top-left image convention. 255 marks a
/// feature pixel, 0 absence. All writes store a fixed value, so overlapping geometry is safe to
/// rasterize in any order.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    size: usize,
    data: Vec<u8>,
}

impl Mask {
    pub fn new(size: usize) -> Mask {
        Mask {
            size,
            data: vec![0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.size + x]
    }

    pub fn set(&mut self, x: i64, y: i64, value: u8) {
        if x >= 0 && y >= 0 && (x as usize) < self.size && (y as usize) < self.size {
            self.data[y as usize * self.size + x as usize] = value;
        }
    }

    pub fn count_value(&self, value: u8) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Scanline fill of one ring in image-pixel space. Pixels whose center lies inside the ring get
/// `value`. The even-odd rule falls out of pairing sorted edge crossings.
fn fill_ring(mask: &mut Mask, ring: &[Vec2], value: u8) {
    if ring.len() < 3 {
        return;
    }
    let y_min = ring.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let y_max = ring.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let y_start = y_min.floor().max(0.0) as i64;
    let y_end = (y_max.ceil() as i64).min(mask.size as i64 - 1);

    let mut crossings: Vec<f64> = Vec::new();
    for y in y_start..=y_end {
        let yc = y as f64 + 0.5;
        crossings.clear();
        let n = ring.len();
        for i in 0..n {
            let p1 = ring[i];
            let p2 = ring[(i + 1) % n];
            // Half-open test so a vertex exactly on the scanline counts once
            if (p1.y <= yc && yc < p2.y) || (p2.y <= yc && yc < p1.y) {
                crossings.push(p1.x + (yc - p1.y) * (p2.x - p1.x) / (p2.y - p1.y));
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for pair in crossings.chunks(2) {
            if pair.len() < 2 {
                break;
            }
            // Pixels whose center falls within [xs, xe]; the closed right edge keeps a span
            // ending exactly on a pixel center lit, which matters for hairline roads
            let x_start = (pair[0] - 0.5).ceil().max(0.0) as i64;
            let x_end = (pair[1] - 0.5).floor() as i64;
            for x in x_start..=x_end.min(mask.size as i64 - 1) {
                mask.set(x, y, value);
            }
        }
    }
}

/// Fill a polygon with holes: the outer ring writes 255, then every inner ring writes 0 over it.
pub fn fill_polygon(mask: &mut Mask, outer: &[Vec2], inners: &[Vec<Vec2>]) {
    fill_ring(mask, outer, 255);
    for inner in inners {
        fill_ring(mask, inner, 0);
    }
}

/// Extra outer parts of a multipolygon are filled plain, with no hole inheritance across parts.
pub fn fill_outer_part(mask: &mut Mask, part: &[Vec2]) {
    fill_ring(mask, part, 255);
}

/// Converts a terrain-meter point (bottom-left origin) to image-pixel space (top-left origin).
pub fn meters_to_image(p: Vec2, meters_per_pixel: f64, size: usize) -> Vec2 {
    Vec2::new(p.x / meters_per_pixel, size as f64 - p.y / meters_per_pixel)
}

/// Rasterize a road spline as a strip of quads: sample finely, offset each sample half a width
/// along its normal, and scanline-fill every consecutive quad.
pub fn fill_spline_band(mask: &mut Mask, spline: &RoadSpline, width_meters: f64, meters_per_pixel: f64) {
    let step = f64::min(0.25, meters_per_pixel * 0.5);
    let half = width_meters / 2.0;
    let size = mask.size;
    for (a, b) in spline.sample_by_interval(step).iter().tuple_windows() {
        let quad = [
            meters_to_image(a.position + a.normal * half, meters_per_pixel, size),
            meters_to_image(a.position - a.normal * half, meters_per_pixel, size),
            meters_to_image(b.position - b.normal * half, meters_per_pixel, size),
            meters_to_image(b.position + b.normal * half, meters_per_pixel, size),
        ];
        fill_ring(mask, &quad, 255);
    }
}

/// Thick-line rasterization of a raw polyline in meters; the fallback for painting original OSM
/// geometry without going through a spline.
pub fn fill_thick_polyline(
    mask: &mut Mask,
    points: &[Vec2],
    width_meters: f64,
    meters_per_pixel: f64,
) {
    let half = width_meters / 2.0;
    let size = mask.size;
    for (p1, p2) in points.iter().tuple_windows() {
        let dir = match (*p2 - *p1).normalized() {
            Some(d) => d,
            None => continue,
        };
        let n = dir.left_normal();
        let quad = [
            meters_to_image(*p1 + n * half, meters_per_pixel, size),
            meters_to_image(*p1 - n * half, meters_per_pixel, size),
            meters_to_image(*p2 - n * half, meters_per_pixel, size),
            meters_to_image(*p2 + n * half, meters_per_pixel, size),
        ];
        fill_ring(mask, &quad, 255);
    }
}

/// Bresenham's line, calling `plot` for every pixel. Used by the debug renderer.
pub fn bresenham_line<F: FnMut(i64, i64)>(x0: i64, y0: i64, x1: i64, y1: i64, mut plot: F) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);
    loop {
        plot(x, y);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::InterpolationMode;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Vec2> {
        vec![
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ]
    }

    #[test]
    fn lake_with_island() {
        // Outer 0..100, inner 40..60: 100^2 - 20^2 pixels survive
        let mut mask = Mask::new(128);
        fill_polygon(&mut mask, &square(0.0, 0.0, 100.0, 100.0), &[square(40.0, 40.0, 60.0, 60.0)]);
        assert_eq!(mask.count_value(255), 100 * 100 - 20 * 20);
        assert_eq!(mask.get(50, 50), 0);
        assert_eq!(mask.get(10, 10), 255);
        assert_eq!(mask.get(110, 50), 0);
    }

    #[test]
    fn rasterization_is_idempotent() {
        let outer = square(3.0, 7.0, 60.0, 50.0);
        let inner = vec![square(10.0, 10.0, 20.0, 30.0)];
        let mut once = Mask::new(64);
        fill_polygon(&mut once, &outer, &inner);
        let mut twice = once.clone();
        fill_polygon(&mut twice, &outer, &inner);
        assert_eq!(once, twice);
    }

    #[test]
    fn hole_touches_nothing_outside_outer_bbox() {
        let mut mask = Mask::new(64);
        fill_polygon(&mut mask, &square(10.0, 10.0, 20.0, 20.0), &[]);
        for y in 0..64 {
            for x in 0..64 {
                let inside = (10..20).contains(&x) && (10..20).contains(&y);
                assert_eq!(mask.get(x, y) == 255, inside, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn vertical_spline_band_is_a_strip() {
        // A 1 m wide road at x=0.5 in a 1 px/m mask covers the x=0 column
        let spline = RoadSpline::new(
            vec![Vec2::new(0.5, 0.0), Vec2::new(0.5, 64.0)],
            InterpolationMode::LinearControlPoints,
        )
        .unwrap();
        let mut mask = Mask::new(64);
        fill_spline_band(&mut mask, &spline, 1.0, 1.0);
        for y in 0..64 {
            assert_eq!(mask.get(0, y), 255, "row {y}");
            for x in 2..64 {
                assert_eq!(mask.get(x, y), 0, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn bresenham_endpoints() {
        let mut pts = Vec::new();
        bresenham_line(0, 0, 5, 3, |x, y| pts.push((x, y)));
        assert_eq!(pts.first(), Some(&(0, 0)));
        assert_eq!(pts.last(), Some(&(5, 3)));
        assert_eq!(pts.len(), 6);
    }
}
