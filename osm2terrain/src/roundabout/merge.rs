use anyhow::Result;
use enumset::EnumSet;

use crate::clip::clip_polyline;
use crate::geometry::{InterpolationMode, RoadSpline, Vec2};
use crate::osm::WayID;
use crate::paths::dedupe_points;
use crate::types::{ConnectionDirection, SplineFlag, TerrainConfig};
use crate::{parse_layer, AnnotatedRoadSpline, CoordinateTransformer, SplineID};

use super::OsmRoundabout;

/// Gaps up to 10 cm at the seam just close silently; anything bigger gets an explicit closing
/// point.
const CLOSURE_TOLERANCE_METERS: f64 = 0.1;
const COARSE_SAMPLE_METERS: f64 = 0.5;
const FINE_SAMPLE_METERS: f64 = 0.05;

/// A connection translated into spline space, for junction detection downstream.
#[derive(Clone, Debug)]
pub struct RingConnection {
    pub way_id: WayID,
    pub point: Vec2,
    pub distance_along_spline: f64,
    pub angle_degrees: f64,
    pub direction: ConnectionDirection,
}

/// What became of one detected roundabout: its closed-loop spline and where its roads attach.
#[derive(Clone, Debug)]
pub struct ProcessedRoundaboutInfo {
    pub roundabout_id: usize,
    pub spline_id: SplineID,
    /// Ring center in terrain meters.
    pub center: Vec2,
    pub radius_meters: f64,
    pub connections: Vec<RingConnection>,
    pub way_ids: Vec<WayID>,
}

/// Turn one assembled roundabout into a smooth closed-loop spline in terrain meters, and locate
/// every connection's distance along it. Roundabouts are always smoothly interpolated no matter
/// what the caller wants for ordinary roads; a polygonal roundabout looks terrible in game.
pub fn merge_roundabout(
    rb: &OsmRoundabout,
    transformer: &CoordinateTransformer,
    config: &TerrainConfig,
    spline_id: SplineID,
) -> Result<(AnnotatedRoadSpline, ProcessedRoundaboutInfo)> {
    let pixel_ring: Vec<Vec2> = rb
        .ring
        .iter()
        .map(|c| {
            let (x, y) = transformer.to_terrain_pixel(*c);
            Vec2::new(x, y)
        })
        .collect();

    // Clipping an on-edge roundabout can split the ring; the pieces rejoin in order and the
    // forced closure below stitches the seam
    let mut points: Vec<Vec2> = Vec::new();
    for run in clip_polyline(&pixel_ring, config.terrain_size as f64) {
        points.extend(run.points);
    }
    for p in &mut points {
        *p = *p * config.meters_per_pixel;
    }

    if points.len() < 2 {
        bail!("roundabout {} lies outside the terrain", rb.id);
    }
    if points[0].dist_to(*points.last().unwrap()) > CLOSURE_TOLERANCE_METERS {
        points.push(points[0]);
    }
    dedupe_points(&mut points, config.duplicate_point_tolerance_meters);

    let distinct = if points[0].dist_to(*points.last().unwrap()) < CLOSURE_TOLERANCE_METERS {
        points.len() - 1
    } else {
        points.len()
    };
    if distinct < 4 {
        bail!(
            "roundabout {}: only {distinct} distinct ring points after clipping",
            rb.id
        );
    }

    let spline = RoadSpline::new(points, InterpolationMode::SmoothInterpolated)?;

    let mut connections = Vec::new();
    for conn in &rb.connections {
        let (x, y) = transformer.to_terrain_pixel(conn.point);
        let point = Vec2::new(x, y) * config.meters_per_pixel;
        connections.push(RingConnection {
            way_id: conn.way_id,
            point,
            distance_along_spline: nearest_distance_along(&spline, point),
            angle_degrees: conn.angle_degrees,
            direction: conn.direction,
        });
    }

    let (cx, cy) = transformer.to_terrain_pixel(rb.center);
    let center = Vec2::new(cx, cy) * config.meters_per_pixel;

    let mut flags = EnumSet::new();
    flags.insert(SplineFlag::Roundabout);
    let annotated = AnnotatedRoadSpline::new(spline_id, spline, flags, parse_layer(&rb.tags), None);

    let info = ProcessedRoundaboutInfo {
        roundabout_id: rb.id,
        spline_id,
        center,
        radius_meters: rb.radius_meters,
        connections,
        way_ids: rb.way_ids.iter().copied().collect(),
    };
    Ok((annotated, info))
}

/// Closest point on the spline to `target`: coarse pass every 0.5 m, then a 5 cm sweep around
/// the winner.
fn nearest_distance_along(spline: &RoadSpline, target: Vec2) -> f64 {
    let length = spline.total_length();
    let mut best = (f64::INFINITY, 0.0);
    let mut d = 0.0;
    while d <= length {
        let dist = spline.point_at_distance(d).dist_to(target);
        if dist < best.0 {
            best = (dist, d);
        }
        d += COARSE_SAMPLE_METERS;
    }
    let lo = (best.1 - COARSE_SAMPLE_METERS).max(0.0);
    let hi = (best.1 + COARSE_SAMPLE_METERS).min(length);
    let mut d = lo;
    while d <= hi {
        let dist = spline.point_at_distance(d).dist_to(target);
        if dist < best.0 {
            best = (dist, d);
        }
        d += FINE_SAMPLE_METERS;
    }
    best.1
}
