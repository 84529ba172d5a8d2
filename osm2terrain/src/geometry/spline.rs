use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::Vec2;

/// How the curve passes through its control points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMode {
    /// C1-continuous through every control point, with tangents chosen so that closed input
    /// (first point equals last) gets a smooth seam.
    SmoothInterpolated,
    /// Straight segments between control points.
    LinearControlPoints,
}

/// One sample along a spline: where it is and which way it points.
#[derive(Clone, Copy, Debug)]
pub struct SplineSample {
    pub position: Vec2,
    /// Unit tangent in the direction of increasing distance.
    pub tangent: Vec2,
    /// Unit left normal of the tangent.
    pub normal: Vec2,
}

const CLOSED_SEAM_TOLERANCE: f64 = 0.01;
/// Subdivisions per segment for the smooth arc-length table.
const ARC_SUBDIV: usize = 16;

/// A parametric polyline through control points in meters. Immutable after construction; the
/// arc-length table is built once so distance queries are cheap.
#[derive(Clone, Debug)]
pub struct RoadSpline {
    control_points: Vec<Vec2>,
    mode: InterpolationMode,
    closed: bool,
    /// Cumulative arc length at each control point. `cumulative[0]` is 0; the last entry is the
    /// total length.
    cumulative: Vec<f64>,
    /// Per segment, cumulative length at each of the `ARC_SUBDIV + 1` subdivision parameters.
    segment_tables: Vec<Vec<f64>>,
    total_length: f64,
}

impl RoadSpline {
    /// Callers must remove consecutive duplicates below 1 cm first; degenerate segments break
    /// tangent estimation.
    pub fn new(control_points: Vec<Vec2>, mode: InterpolationMode) -> Result<RoadSpline> {
        if control_points.len() < 2 {
            bail!(
                "a spline needs at least 2 control points, got {}",
                control_points.len()
            );
        }
        let closed = control_points[0].dist_to(*control_points.last().unwrap())
            < CLOSED_SEAM_TOLERANCE
            && control_points.len() > 2;

        let mut spline = RoadSpline {
            control_points,
            mode,
            closed,
            cumulative: Vec::new(),
            segment_tables: Vec::new(),
            total_length: 0.0,
        };
        spline.build_length_table();
        Ok(spline)
    }

    fn build_length_table(&mut self) {
        let subdiv = match self.mode {
            InterpolationMode::SmoothInterpolated => ARC_SUBDIV,
            InterpolationMode::LinearControlPoints => 1,
        };
        let n_segments = self.control_points.len() - 1;
        self.cumulative = Vec::with_capacity(n_segments + 1);
        self.segment_tables = Vec::with_capacity(n_segments);
        self.cumulative.push(0.0);
        let mut total = 0.0;
        for seg in 0..n_segments {
            let mut table = Vec::with_capacity(subdiv + 1);
            table.push(0.0);
            let mut prev = self.position_on_segment(seg, 0.0);
            let mut seg_len = 0.0;
            for k in 1..=subdiv {
                let pt = self.position_on_segment(seg, k as f64 / subdiv as f64);
                seg_len += prev.dist_to(pt);
                table.push(seg_len);
                prev = pt;
            }
            total += seg_len;
            self.cumulative.push(total);
            self.segment_tables.push(table);
        }
        self.total_length = total;
    }

    pub fn control_points(&self) -> &[Vec2] {
        &self.control_points
    }

    pub fn mode(&self) -> InterpolationMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    pub fn first_point(&self) -> Vec2 {
        self.control_points[0]
    }

    pub fn last_point(&self) -> Vec2 {
        *self.control_points.last().unwrap()
    }

    /// Tangent (not normalized) at control point `i`, Catmull-Rom style. On a closed spline the
    /// seam uses the real neighbors on both sides, so the loop stays smooth there.
    fn tangent_at_control(&self, i: usize) -> Vec2 {
        let pts = &self.control_points;
        let last = pts.len() - 1;
        if self.closed && (i == 0 || i == last) {
            return (pts[1] - pts[last - 1]) * 0.5;
        }
        if i == 0 {
            pts[1] - pts[0]
        } else if i == last {
            pts[last] - pts[last - 1]
        } else {
            (pts[i + 1] - pts[i - 1]) * 0.5
        }
    }

    fn position_on_segment(&self, seg: usize, t: f64) -> Vec2 {
        let p0 = self.control_points[seg];
        let p1 = self.control_points[seg + 1];
        match self.mode {
            InterpolationMode::LinearControlPoints => p0.lerp(p1, t),
            InterpolationMode::SmoothInterpolated => {
                let m0 = self.tangent_at_control(seg);
                let m1 = self.tangent_at_control(seg + 1);
                let t2 = t * t;
                let t3 = t2 * t;
                let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                let h10 = t3 - 2.0 * t2 + t;
                let h01 = -2.0 * t3 + 3.0 * t2;
                let h11 = t3 - t2;
                p0 * h00 + m0 * h10 + p1 * h01 + m1 * h11
            }
        }
    }

    fn derivative_on_segment(&self, seg: usize, t: f64) -> Vec2 {
        let p0 = self.control_points[seg];
        let p1 = self.control_points[seg + 1];
        match self.mode {
            InterpolationMode::LinearControlPoints => p1 - p0,
            InterpolationMode::SmoothInterpolated => {
                let m0 = self.tangent_at_control(seg);
                let m1 = self.tangent_at_control(seg + 1);
                let t2 = t * t;
                let h00 = 6.0 * t2 - 6.0 * t;
                let h10 = 3.0 * t2 - 4.0 * t + 1.0;
                let h01 = -6.0 * t2 + 6.0 * t;
                let h11 = 3.0 * t2 - 2.0 * t;
                p0 * h00 + m0 * h10 + p1 * h01 + m1 * h11
            }
        }
    }

    /// Locate the segment and local parameter at `distance`, clamped to the spline.
    fn locate(&self, distance: f64) -> (usize, f64) {
        let d = distance.clamp(0.0, self.total_length);
        // First cumulative entry strictly greater than d marks the segment after ours.
        let seg = match self.cumulative.partition_point(|&len| len <= d) {
            0 => 0,
            idx => (idx - 1).min(self.control_points.len() - 2),
        };
        let local = d - self.cumulative[seg];
        let table = &self.segment_tables[seg];
        let seg_len = *table.last().unwrap();
        if seg_len < 1e-12 {
            return (seg, 0.0);
        }
        let k = match table.partition_point(|&len| len <= local) {
            0 => 0,
            idx => (idx - 1).min(table.len() - 2),
        };
        let span = table[k + 1] - table[k];
        let frac = if span < 1e-12 {
            0.0
        } else {
            (local - table[k]) / span
        };
        let subdiv = (table.len() - 1) as f64;
        (seg, (k as f64 + frac) / subdiv)
    }

    pub fn point_at_distance(&self, distance: f64) -> Vec2 {
        let (seg, t) = self.locate(distance);
        self.position_on_segment(seg, t)
    }

    pub fn sample_at_distance(&self, distance: f64) -> SplineSample {
        let (seg, t) = self.locate(distance);
        let position = self.position_on_segment(seg, t);
        let tangent = self
            .derivative_on_segment(seg, t)
            .normalized()
            // A flat spot in the curve; the chord still points the right way
            .or_else(|| (self.control_points[seg + 1] - self.control_points[seg]).normalized())
            .unwrap_or(Vec2::new(1.0, 0.0));
        SplineSample {
            position,
            tangent,
            normal: tangent.left_normal(),
        }
    }

    /// Samples at 0, step, 2*step, ... plus one final sample exactly at the total length.
    pub fn sample_by_interval(&self, step: f64) -> Vec<SplineSample> {
        assert!(step > 0.0);
        let mut out = Vec::new();
        let mut d = 0.0;
        while d < self.total_length {
            out.push(self.sample_at_distance(d));
            d += step;
        }
        out.push(self.sample_at_distance(self.total_length));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spline(pts: Vec<(f64, f64)>, mode: InterpolationMode) -> RoadSpline {
        RoadSpline::new(pts.into_iter().map(|(x, y)| Vec2::new(x, y)).collect(), mode).unwrap()
    }

    #[test]
    fn too_few_points() {
        assert!(RoadSpline::new(vec![Vec2::zero()], InterpolationMode::LinearControlPoints).is_err());
    }

    #[test]
    fn linear_length_is_exact() {
        let s = spline(
            vec![(0.0, 0.0), (3.0, 4.0), (3.0, 14.0)],
            InterpolationMode::LinearControlPoints,
        );
        assert!((s.total_length() - 15.0).abs() < 1e-9);
        let mid = s.point_at_distance(5.0);
        assert!(mid.dist_to(Vec2::new(3.0, 4.0)) < 1e-9);
    }

    #[test]
    fn length_at_least_endpoint_distance() {
        // Holds for both modes on a handful of shapes
        for mode in [
            InterpolationMode::LinearControlPoints,
            InterpolationMode::SmoothInterpolated,
        ] {
            for pts in [
                vec![(0.0, 0.0), (10.0, 0.0)],
                vec![(0.0, 0.0), (5.0, 5.0), (10.0, 0.0)],
                vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)],
            ] {
                let s = spline(pts, mode);
                let chord = s.first_point().dist_to(s.last_point());
                assert!(
                    s.total_length() >= chord - 1e-9,
                    "{mode:?}: {} < {chord}",
                    s.total_length()
                );
            }
        }
    }

    #[test]
    fn smooth_passes_through_control_points() {
        let s = spline(
            vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)],
            InterpolationMode::SmoothInterpolated,
        );
        assert!(s.point_at_distance(0.0).dist_to(Vec2::new(0.0, 0.0)) < 1e-9);
        assert!(
            s.point_at_distance(s.total_length())
                .dist_to(Vec2::new(10.0, 10.0))
                < 1e-9
        );
    }

    #[test]
    fn interval_sampling_covers_whole_length() {
        let s = spline(
            vec![(0.0, 0.0), (10.0, 0.0)],
            InterpolationMode::LinearControlPoints,
        );
        let samples = s.sample_by_interval(3.0);
        // 0, 3, 6, 9, then the endpoint
        assert_eq!(samples.len(), 5);
        assert!(samples[0].position.dist_to(Vec2::new(0.0, 0.0)) < 1e-9);
        assert!(samples[4].position.dist_to(Vec2::new(10.0, 0.0)) < 1e-9);
        for s in &samples {
            assert!(s.tangent.dist_to(Vec2::new(1.0, 0.0)) < 1e-9);
            assert!(s.normal.dist_to(Vec2::new(0.0, 1.0)) < 1e-9);
        }
    }

    #[test]
    fn closed_ring_detected() {
        let s = spline(
            vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)],
            InterpolationMode::SmoothInterpolated,
        );
        assert!(s.is_closed());
        // The seam tangent is shared between the first and last control points
        let start = s.sample_at_distance(0.0);
        let end = s.sample_at_distance(s.total_length());
        assert!(start.tangent.dist_to(end.tangent) < 1e-9);
    }
}
