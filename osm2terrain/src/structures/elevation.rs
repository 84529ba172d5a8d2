use serde::{Deserialize, Serialize};

use crate::geometry::Vec2;
use crate::heightmap::Heightmap;
use crate::types::{CurveKind, TerrainConfig};

/// Hermite easing with zero slope at both ends.
pub fn smoothstep(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    3.0 * x * x - 2.0 * x * x * x
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// The vertical curve of a bridge or tunnel, from its entry to its exit. Built once by the
/// matcher and immutable afterwards; `elevation_at` evaluates it at any normalized position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructureElevationProfile {
    pub entry_elevation: f64,
    pub exit_elevation: f64,
    pub length: f64,
    pub curve: CurveKind,
    pub lowest_elevation: f64,
    pub highest_elevation: f64,
    pub max_grade_percent: f64,
    /// Smallest distance between the deck and the terrain (bridges), or the terrain and the
    /// tunnel roof allowance (tunnels). Zero when no terrain samples were available.
    pub min_clearance: f64,
    pub terrain_samples: Option<Vec<f64>>,
    pub valid: bool,
    pub message: Option<String>,
    /// S-curve phase split; unused by the other curve kinds.
    descent_fraction: f64,
    level_fraction: f64,
}

impl StructureElevationProfile {
    /// Short bridges stay linear, medium ones sag slightly toward mid-span, and long ones
    /// arch upward for clearance underneath.
    pub fn for_bridge(
        length: f64,
        entry: f64,
        exit: f64,
        terrain: Option<Vec<f64>>,
        config: &TerrainConfig,
    ) -> StructureElevationProfile {
        let curve = if length <= config.short_bridge_max_length_meters {
            CurveKind::Linear
        } else if length <= config.medium_bridge_max_length_meters {
            CurveKind::Parabolic
        } else {
            CurveKind::Arch
        };
        let mut profile = StructureElevationProfile {
            entry_elevation: entry,
            exit_elevation: exit,
            length,
            curve,
            lowest_elevation: 0.0,
            highest_elevation: 0.0,
            max_grade_percent: 0.0,
            min_clearance: 0.0,
            terrain_samples: terrain,
            valid: true,
            message: None,
            descent_fraction: config.tunnel_descent_fraction,
            level_fraction: config.tunnel_level_fraction,
        };
        profile.finish_extremes();
        profile.min_clearance = profile
            .clearances()
            .map(|c| c.into_iter().fold(f64::INFINITY, f64::min))
            .unwrap_or(0.0);
        profile
    }

    /// A tunnel stays linear when the straight line keeps enough rock overhead everywhere;
    /// otherwise it dives through an S-curve to a flat level deep enough under the highest
    /// terrain in its middle half.
    pub fn for_tunnel(
        length: f64,
        entry: f64,
        exit: f64,
        terrain: Vec<f64>,
        config: &TerrainConfig,
    ) -> StructureElevationProfile {
        let clearance = config.tunnel_min_clearance_meters + config.tunnel_interior_height_meters;
        let n = terrain.len();
        // No terrain samples means nothing demands an S-curve
        let linear_ok = terrain.iter().enumerate().all(|(i, &ground)| {
            let t = if n == 1 { 0.0 } else { i as f64 / (n - 1) as f64 };
            lerp(entry, exit, t) + clearance <= ground
        });

        let descent = config.tunnel_descent_fraction;
        let level = config.tunnel_level_fraction;
        let mut profile = StructureElevationProfile {
            entry_elevation: entry,
            exit_elevation: exit,
            length,
            curve: if linear_ok {
                CurveKind::Linear
            } else {
                CurveKind::SCurve
            },
            lowest_elevation: 0.0,
            highest_elevation: 0.0,
            max_grade_percent: 0.0,
            min_clearance: 0.0,
            terrain_samples: Some(terrain),
            valid: true,
            message: None,
            descent_fraction: descent,
            level_fraction: level,
        };

        if profile.curve == CurveKind::SCurve {
            let terrain = profile.terrain_samples.as_ref().unwrap();
            let n = terrain.len();
            // Highest ground over the level phase dictates how deep the level runs
            let mid_max = terrain
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    let t = if n == 1 { 0.0 } else { *i as f64 / (n - 1) as f64 };
                    t >= descent && t <= descent + level
                })
                .map(|(_, &g)| g)
                .fold(f64::NEG_INFINITY, f64::max);
            let mid_max = if mid_max.is_finite() {
                mid_max
            } else {
                terrain.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            };
            profile.lowest_elevation = mid_max - clearance;

            let ascent = 1.0 - descent - level;
            let descent_grade =
                (entry - profile.lowest_elevation).abs() / (length * descent) * 100.0;
            let ascent_grade = (exit - profile.lowest_elevation).abs() / (length * ascent) * 100.0;
            profile.max_grade_percent = descent_grade.max(ascent_grade);
            if profile.max_grade_percent > config.tunnel_max_grade_percent {
                profile.valid = false;
                profile.message = Some(format!(
                    "tunnel grade {:.2}% exceeds the {:.1}% limit (descent {:.2}%, ascent {:.2}%)",
                    profile.max_grade_percent,
                    config.tunnel_max_grade_percent,
                    descent_grade,
                    ascent_grade
                ));
            }
            profile.highest_elevation = entry.max(exit);
        }

        profile.finish_extremes();
        profile.min_clearance = profile
            .clearances()
            .map(|c| c.into_iter().fold(f64::INFINITY, f64::min))
            .unwrap_or(0.0);
        profile
    }

    /// Deck elevation at normalized position t in [0, 1].
    pub fn elevation_at(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self.curve {
            CurveKind::Linear => lerp(self.entry_elevation, self.exit_elevation, t),
            CurveKind::Parabolic => {
                let sag = f64::min(self.length * 0.005, 2.0);
                lerp(self.entry_elevation, self.exit_elevation, t) - 4.0 * sag * t * (1.0 - t)
            }
            CurveKind::Arch => {
                let rise = f64::min(self.length * 0.01, 10.0);
                lerp(self.entry_elevation, self.exit_elevation, t) + 4.0 * rise * t * (1.0 - t)
            }
            CurveKind::SCurve => {
                let d = self.descent_fraction;
                let l = self.level_fraction;
                if t <= d {
                    lerp(self.entry_elevation, self.lowest_elevation, smoothstep(t / d))
                } else if t <= d + l {
                    self.lowest_elevation
                } else {
                    lerp(
                        self.lowest_elevation,
                        self.exit_elevation,
                        smoothstep((t - d - l) / (1.0 - d - l)),
                    )
                }
            }
        }
    }

    /// Fill lowest/highest (and the grade for bridge curves) from a dense evaluation.
    fn finish_extremes(&mut self) {
        const STEPS: usize = 100;
        let mut lowest = f64::INFINITY;
        let mut highest = f64::NEG_INFINITY;
        let mut max_slope = 0.0_f64;
        let mut prev = self.elevation_at(0.0);
        for i in 0..=STEPS {
            let t = i as f64 / STEPS as f64;
            let e = self.elevation_at(t);
            lowest = lowest.min(e);
            highest = highest.max(e);
            if i > 0 && self.length > 0.0 {
                let run = self.length / STEPS as f64;
                max_slope = max_slope.max((e - prev).abs() / run);
            }
            prev = e;
        }
        // The S-curve already computed its analytic grade and level elevation
        if self.curve != CurveKind::SCurve {
            self.lowest_elevation = lowest;
            self.highest_elevation = highest;
            self.max_grade_percent = max_slope * 100.0;
        } else {
            self.highest_elevation = highest;
        }
    }

    /// Vertical distance to terrain at every sample, signed so that a deficit shows up as a
    /// negative clearance.
    fn clearances(&self) -> Option<Vec<f64>> {
        let terrain = self.terrain_samples.as_ref()?;
        if terrain.is_empty() {
            return None;
        }
        let n = terrain.len();
        Some(
            terrain
                .iter()
                .enumerate()
                .map(|(i, &ground)| {
                    let t = if n == 1 { 0.0 } else { i as f64 / (n - 1) as f64 };
                    let deck = self.elevation_at(t);
                    if self.curve == CurveKind::SCurve || deck <= ground {
                        // Underground: headroom between the roof and the surface
                        ground - deck
                    } else {
                        deck - ground
                    }
                })
                .collect(),
        )
    }
}

/// Evenly spaced terrain elevations along a polyline in meters, bilinearly interpolated from
/// the heightmap.
pub fn sample_terrain_along(
    points: &[Vec2],
    heightmap: &Heightmap,
    count: usize,
    meters_per_pixel: f64,
) -> Vec<f64> {
    if points.is_empty() || count == 0 {
        return Vec::new();
    }
    let lengths: Vec<f64> = points.windows(2).map(|w| w[0].dist_to(w[1])).collect();
    let total: f64 = lengths.iter().sum();
    if total <= 0.0 || points.len() == 1 {
        return vec![heightmap.sample_at_meters(points[0], meters_per_pixel); count];
    }

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let target = total * i as f64 / (count - 1).max(1) as f64;
        let mut remaining = target;
        let mut position = *points.last().unwrap();
        for (w, &seg) in points.windows(2).zip(&lengths) {
            if seg >= remaining {
                position = w[0].lerp(w[1], if seg > 0.0 { remaining / seg } else { 0.0 });
                break;
            }
            remaining -= seg;
        }
        out.push(heightmap.sample_at_meters(position, meters_per_pixel));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TerrainConfig {
        TerrainConfig::default_for(1024, 1.0)
    }

    #[test]
    fn short_bridge_is_linear() {
        let p = StructureElevationProfile::for_bridge(40.0, 100.0, 103.0, None, &config());
        assert_eq!(p.curve, CurveKind::Linear);
        assert!((p.elevation_at(0.5) - 101.5).abs() < 1e-9);
        assert!(p.valid);
    }

    #[test]
    fn medium_bridge_sags_symmetrically() {
        let p = StructureElevationProfile::for_bridge(100.0, 50.0, 50.0, None, &config());
        assert_eq!(p.curve, CurveKind::Parabolic);
        // Symmetric around mid-span for equal entry and exit
        for i in 0..=10 {
            let t = i as f64 / 10.0;
            assert!((p.elevation_at(t) - p.elevation_at(1.0 - t)).abs() < 1e-9);
        }
        // maxSag = min(100 * 0.005, 2) = 0.5, dipping at mid-span
        assert!((p.elevation_at(0.5) - 49.5).abs() < 1e-9);
        assert!((p.lowest_elevation - 49.5).abs() < 1e-6);
    }

    #[test]
    fn long_bridge_arches() {
        let p = StructureElevationProfile::for_bridge(400.0, 10.0, 10.0, None, &config());
        assert_eq!(p.curve, CurveKind::Arch);
        // maxRise capped at 10
        assert!((p.elevation_at(0.5) - 20.0).abs() < 1e-9);
        assert!((p.highest_elevation - 20.0).abs() < 1e-6);
    }

    #[test]
    fn shallow_tunnel_stays_linear() {
        // Ground is comfortably 12 m above the line everywhere
        let terrain = vec![62.0; 20];
        let p = StructureElevationProfile::for_tunnel(100.0, 50.0, 50.0, terrain, &config());
        assert_eq!(p.curve, CurveKind::Linear);
        assert!(p.valid);
    }

    #[test]
    fn deep_tunnel_s_curve_and_grade_limit() {
        // 300 m tunnel, entry 50, exit 52, flat ground at 55: the required 10 m of clearance
        // forces the level down to 45, and both ramps break the 6% limit (descent
        // 5/75 = 6.67%, ascent 7/75 = 9.33%)
        let terrain = vec![55.0; 20];
        let p = StructureElevationProfile::for_tunnel(300.0, 50.0, 52.0, terrain, &config());
        assert_eq!(p.curve, CurveKind::SCurve);
        assert!((p.lowest_elevation - 45.0).abs() < 1e-9);
        assert!((p.elevation_at(0.5) - 45.0).abs() < 1e-9);
        assert!((p.max_grade_percent - 28.0 / 3.0).abs() < 0.01);
        assert!(!p.valid);
        assert!(p.message.as_ref().unwrap().contains("exceeds"));
        assert!(p.message.as_ref().unwrap().contains("6.67"));
    }

    #[test]
    fn s_curve_level_phase_is_flat() {
        let terrain = vec![55.0; 20];
        let p = StructureElevationProfile::for_tunnel(1000.0, 50.0, 52.0, terrain, &config());
        assert_eq!(p.curve, CurveKind::SCurve);
        for i in 0..=20 {
            let t = 0.25 + 0.5 * i as f64 / 20.0;
            assert_eq!(p.elevation_at(t), p.lowest_elevation);
        }
        // Smooth ends: entry and exit hit exactly
        assert!((p.elevation_at(0.0) - 50.0).abs() < 1e-9);
        assert!((p.elevation_at(1.0) - 52.0).abs() < 1e-9);
        // 1000 m is long enough for a legal grade
        assert!(p.valid);
    }

    #[test]
    fn terrain_sampling_walks_the_polyline() {
        let hm = Heightmap::new(11, 1, (0..11).map(|x| x as f32).collect()).unwrap();
        let pts = vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)];
        let samples = sample_terrain_along(&pts, &hm, 5, 1.0);
        assert_eq!(samples.len(), 5);
        assert!((samples[0] - 0.0).abs() < 1e-9);
        assert!((samples[2] - 5.0).abs() < 1e-9);
        assert!((samples[4] - 10.0).abs() < 1e-9);
    }
}
