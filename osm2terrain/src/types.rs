use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use enumset::EnumSetType;
use serde::{Deserialize, Serialize};

/// All the tuning knobs for one terrain conversion. Every distance is in meters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerrainConfig {
    /// Scale between terrain pixels and meters. Must be positive.
    pub meters_per_pixel: f64,
    /// Side length of the square terrain in pixels, usually a power of two.
    pub terrain_size: usize,

    /// Skip splines shorter than this after assembly.
    pub min_path_length_meters: f64,
    /// Consecutive points closer than this collapse into one.
    pub duplicate_point_tolerance_meters: f64,
    /// Endpoints without a shared OSM node may still join when they're this close.
    pub endpoint_join_tolerance_meters: f64,
    /// A connecting road's point counts as "on the ring" when its distance from the roundabout
    /// center is within this much of the ring radius.
    pub roundabout_overlap_tolerance_meters: f64,

    /// A structure point counts as overlapping a spline within this distance.
    pub max_match_distance_meters: f64,
    /// Reject a structure/spline match below this overlap percentage.
    pub min_overlap_percent: f64,

    pub tunnel_min_clearance_meters: f64,
    pub tunnel_interior_height_meters: f64,
    pub tunnel_max_grade_percent: f64,
    /// Fraction of a tunnel's length spent descending to the level phase.
    pub tunnel_descent_fraction: f64,
    /// Fraction of a tunnel's length spent at the level elevation.
    pub tunnel_level_fraction: f64,

    /// Bridges up to this length get a linear profile.
    pub short_bridge_max_length_meters: f64,
    /// Bridges up to this length get a parabolic sag profile; anything longer arches.
    pub medium_bridge_max_length_meters: f64,

    /// How many elevation samples to take along a structure.
    pub default_terrain_sample_count: usize,

    /// Nominal full road width, used for rasterization and cross sections.
    pub road_width_meters: f64,
    /// Painted surface width for the layer mask. Non-positive means use `road_width_meters`.
    pub road_surface_width_meters: f64,

    /// Whether to look for `junction=roundabout` rings at all.
    pub detect_roundabouts: bool,
}

impl TerrainConfig {
    pub fn default_for(terrain_size: usize, meters_per_pixel: f64) -> Self {
        Self {
            meters_per_pixel,
            terrain_size,
            min_path_length_meters: 1.0,
            duplicate_point_tolerance_meters: 0.01,
            endpoint_join_tolerance_meters: 1.0,
            roundabout_overlap_tolerance_meters: 2.0,
            max_match_distance_meters: 10.0,
            min_overlap_percent: 50.0,
            tunnel_min_clearance_meters: 5.0,
            tunnel_interior_height_meters: 5.0,
            tunnel_max_grade_percent: 6.0,
            tunnel_descent_fraction: 0.25,
            tunnel_level_fraction: 0.5,
            short_bridge_max_length_meters: 50.0,
            medium_bridge_max_length_meters: 200.0,
            default_terrain_sample_count: 20,
            road_width_meters: 7.0,
            road_surface_width_meters: 0.0,
            detect_roundabouts: true,
        }
    }

    /// The width actually painted into the layer mask.
    pub fn surface_width(&self) -> f64 {
        if self.road_surface_width_meters > 0.0 {
            self.road_surface_width_meters
        } else {
            self.road_width_meters
        }
    }
}

/// Traffic flow at the point where a road meets a roundabout ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionDirection {
    Entry,
    Exit,
    Bidirectional,
}

/// Vertical curve shape of a structure's elevation profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveKind {
    Linear,
    /// Sags toward mid-span; used for medium bridges.
    Parabolic,
    /// Rises toward mid-span; used for long bridges.
    Arch,
    /// Smooth-stepped descent and ascent around a flat level phase; used for deep tunnels.
    SCurve,
}

/// How several splines meet at one place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JunctionKind {
    Endpoint,
    TJunction,
    YJunction,
    CrossRoads,
    Complex,
    /// A spline ends on the interior of another spline.
    MidSplineCrossing,
}

/// Structure annotations carried by a spline.
#[derive(EnumSetType, Debug, Serialize, Deserialize)]
pub enum SplineFlag {
    Bridge,
    Tunnel,
    Roundabout,
}

/// Cooperative cancellation. The orchestrator checks it between stages; the path connector and
/// the structure matcher also check it at their per-feature loop boundaries. Cancelling yields a
/// best-effort partial result, never a panic.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
