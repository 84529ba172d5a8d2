use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::geometry::Vec2;
use crate::heightmap::Heightmap;
use crate::osm::WayID;
use crate::tags::Tags;
use crate::types::{CancelFlag, SplineFlag, TerrainConfig};
use crate::{AnnotatedRoadSpline, CoordinateTransformer, Diagnostics, GeoCoordinate};

mod elevation;

pub use elevation::{sample_terrain_along, smoothstep, StructureElevationProfile};

/// A bridge or tunnel polyline from the structure query, still in WGS84.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OsmStructure {
    pub id: WayID,
    pub coordinates: Vec<GeoCoordinate>,
    pub is_bridge: bool,
    pub is_tunnel: bool,
    pub layer: i32,
    pub tags: Tags,
}

/// Annotation attached to a spline once a structure matched it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructureInfo {
    pub way_id: WayID,
    pub is_bridge: bool,
    pub is_tunnel: bool,
    pub layer: i32,
    pub length_meters: f64,
}

/// Spatial index cell size. Structures look in their own cells plus one neighbor each way, so
/// anything within ~50 m of a spline sample is found.
const GRID_CELL_METERS: f64 = 50.0;
const INDEX_SAMPLE_METERS: f64 = 10.0;
const MATCH_SAMPLE_METERS: f64 = 2.0;
/// A candidate whose structure points average farther than this from the spline is noise.
const MAX_AVG_DISTANCE_METERS: f64 = 20.0;
const AVG_DISTANCE_WEIGHT: f64 = 5.0;
const WAY_ID_MATCH_BONUS: f64 = 100.0;

fn cell_of(p: Vec2) -> (i64, i64) {
    (
        (p.x / GRID_CELL_METERS).floor() as i64,
        (p.y / GRID_CELL_METERS).floor() as i64,
    )
}

/// Match every bridge/tunnel structure to the road spline it describes and annotate the spline
/// with the structure's flags, layer, and (when a heightmap is present) an elevation profile.
/// Unmatched structures are reported and skipped; they never fail the run.
pub fn match_structures(
    splines: &mut [AnnotatedRoadSpline],
    structures: &[OsmStructure],
    transformer: &CoordinateTransformer,
    heightmap: Option<&Heightmap>,
    config: &TerrainConfig,
    diagnostics: &mut Diagnostics,
    cancel: &CancelFlag,
) {
    if structures.is_empty() || splines.is_empty() {
        return;
    }

    // Grid index over coarse spline samples
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (idx, spline) in splines.iter().enumerate() {
        for sample in spline.spline.sample_by_interval(INDEX_SAMPLE_METERS) {
            let cell = cell_of(sample.position);
            let entry = grid.entry(cell).or_default();
            if entry.last() != Some(&idx) {
                entry.push(idx);
            }
        }
    }

    // Fine samples are reused across every structure that considers the same spline
    let mut fine_samples: HashMap<usize, Vec<Vec2>> = HashMap::new();

    for structure in structures {
        if cancel.is_cancelled() {
            return;
        }
        let points: Vec<Vec2> = structure
            .coordinates
            .iter()
            .map(|c| {
                let (x, y) = transformer.to_terrain_pixel(*c);
                Vec2::new(x, y) * config.meters_per_pixel
            })
            .collect();
        if points.len() < 2 {
            continue;
        }
        let length: f64 = points.windows(2).map(|w| w[0].dist_to(w[1])).sum();

        let mut candidates: HashSet<usize> = HashSet::new();
        for p in &points {
            let (cx, cy) = cell_of(*p);
            for dx in -1..=1 {
                for dy in -1..=1 {
                    if let Some(ids) = grid.get(&(cx + dx, cy + dy)) {
                        candidates.extend(ids.iter().copied());
                    }
                }
            }
        }

        let mut best: Option<(f64, usize)> = None;
        let mut ordered: Vec<usize> = candidates.into_iter().collect();
        ordered.sort();
        for spline_idx in ordered {
            let samples = fine_samples.entry(spline_idx).or_insert_with(|| {
                splines[spline_idx]
                    .spline
                    .sample_by_interval(MATCH_SAMPLE_METERS)
                    .into_iter()
                    .map(|s| s.position)
                    .collect()
            });

            let mut total_dist = 0.0;
            let mut overlapping = 0usize;
            for p in &points {
                let min_dist = samples
                    .iter()
                    .map(|s| s.dist_to(*p))
                    .fold(f64::INFINITY, f64::min);
                total_dist += min_dist;
                if min_dist <= config.max_match_distance_meters {
                    overlapping += 1;
                }
            }
            let avg_dist = total_dist / points.len() as f64;
            if avg_dist > MAX_AVG_DISTANCE_METERS {
                continue;
            }
            let overlap_percent = overlapping as f64 / points.len() as f64 * 100.0;
            if overlap_percent < config.min_overlap_percent {
                continue;
            }

            // Way identity doesn't survive path merging, so way-id matching stays off; the
            // score term remains so enabling it later is a data change, not a code change
            let matched_by_way_id = false;
            let score = overlap_percent - AVG_DISTANCE_WEIGHT * avg_dist
                + if matched_by_way_id { WAY_ID_MATCH_BONUS } else { 0.0 };
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, spline_idx));
            }
        }

        match best {
            Some((_, spline_idx)) => {
                apply_structure(
                    &mut splines[spline_idx],
                    structure,
                    &points,
                    length,
                    heightmap,
                    config,
                );
            }
            None => {
                diagnostics.warn(format!(
                    "no road spline matched {} ({})",
                    structure.id,
                    if structure.is_tunnel { "tunnel" } else { "bridge" }
                ));
            }
        }
    }
}

fn apply_structure(
    spline: &mut AnnotatedRoadSpline,
    structure: &OsmStructure,
    points: &[Vec2],
    length: f64,
    heightmap: Option<&Heightmap>,
    config: &TerrainConfig,
) {
    if structure.is_bridge {
        spline.flags.insert(SplineFlag::Bridge);
    }
    if structure.is_tunnel {
        spline.flags.insert(SplineFlag::Tunnel);
    }
    spline.layer = structure.layer;
    spline.structure = Some(StructureInfo {
        way_id: structure.id,
        is_bridge: structure.is_bridge,
        is_tunnel: structure.is_tunnel,
        layer: structure.layer,
        length_meters: length,
    });

    if let Some(heightmap) = heightmap {
        let terrain = sample_terrain_along(
            points,
            heightmap,
            config.default_terrain_sample_count,
            config.meters_per_pixel,
        );
        let entry = heightmap.sample_at_meters(points[0], config.meters_per_pixel);
        let exit = heightmap.sample_at_meters(*points.last().unwrap(), config.meters_per_pixel);
        let profile = if structure.is_tunnel {
            StructureElevationProfile::for_tunnel(length, entry, exit, terrain, config)
        } else {
            StructureElevationProfile::for_bridge(length, entry, exit, Some(terrain), config)
        };
        spline.elevation_profile = Some(profile);
    }
}
