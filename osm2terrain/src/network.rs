use crate::geometry::Vec2;
use crate::heightmap::Heightmap;
use crate::types::{JunctionKind, TerrainConfig};
use crate::{AnnotatedRoadSpline, SplineID};

/// Spacing of cross sections along every spline.
const CROSS_SECTION_INTERVAL_METERS: f64 = 5.0;
/// Two arms within this many degrees of dead straight make a T out of a 3-way junction.
const T_JUNCTION_STRAIGHT_DEGREES: f64 = 30.0;

/// A transverse slice across a road: where it is, which way it faces, how wide the road is
/// there, and what elevation the deck wants against what the terrain has.
#[derive(Clone, Debug)]
pub struct UnifiedCrossSection {
    pub spline_id: SplineID,
    pub local_index: usize,
    pub distance: f64,
    pub center: Vec2,
    pub normal: Vec2,
    pub road_width: f64,
    pub target_elevation: f64,
    pub original_terrain_elevation: f64,
    pub excluded: bool,
}

#[derive(Clone, Debug)]
pub struct Junction {
    pub position: Vec2,
    pub kind: JunctionKind,
    pub excluded: bool,
    /// Set when the meeting splines came from different materials.
    pub cross_material: bool,
}

/// The whole road network in one flat view: spline ids, a cross section every few meters, and
/// every place splines meet, classified.
#[derive(Clone, Debug, Default)]
pub struct UnifiedRoadNetwork {
    pub spline_ids: Vec<SplineID>,
    pub cross_sections: Vec<UnifiedCrossSection>,
    pub junctions: Vec<Junction>,
}

pub fn build_network(
    splines: &[AnnotatedRoadSpline],
    heightmap: Option<&Heightmap>,
    config: &TerrainConfig,
) -> UnifiedRoadNetwork {
    let mut network = UnifiedRoadNetwork {
        spline_ids: splines.iter().map(|s| s.id).collect(),
        cross_sections: Vec::new(),
        junctions: Vec::new(),
    };

    for spline in splines {
        for (local_index, sample) in spline
            .spline
            .sample_by_interval(CROSS_SECTION_INTERVAL_METERS)
            .into_iter()
            .enumerate()
        {
            let distance = (local_index as f64 * CROSS_SECTION_INTERVAL_METERS).min(spline.length);
            let original_terrain_elevation = heightmap
                .map(|hm| hm.sample_at_meters(sample.position, config.meters_per_pixel))
                .unwrap_or(0.0);
            let target_elevation = match &spline.elevation_profile {
                Some(profile) if spline.length > 0.0 => {
                    profile.elevation_at(distance / spline.length)
                }
                _ => original_terrain_elevation,
            };
            network.cross_sections.push(UnifiedCrossSection {
                spline_id: spline.id,
                local_index,
                distance,
                center: sample.position,
                normal: sample.normal,
                road_width: config.surface_width(),
                target_elevation,
                original_terrain_elevation,
                excluded: false,
            });
        }
    }

    detect_junctions(splines, config, &mut network);
    network
}

/// An endpoint of an open spline and the direction its road leaves the junction in.
struct Arm {
    spline: usize,
    position: Vec2,
    away: Vec2,
}

fn detect_junctions(
    splines: &[AnnotatedRoadSpline],
    config: &TerrainConfig,
    network: &mut UnifiedRoadNetwork,
) {
    let tolerance = config.endpoint_join_tolerance_meters;
    let mut arms: Vec<Arm> = Vec::new();
    for (idx, spline) in splines.iter().enumerate() {
        if spline.spline.is_closed() {
            continue;
        }
        let start = spline.spline.sample_at_distance(0.0);
        let end = spline.spline.sample_at_distance(spline.length);
        arms.push(Arm {
            spline: idx,
            position: start.position,
            away: start.tangent,
        });
        arms.push(Arm {
            spline: idx,
            position: end.position,
            away: -end.tangent,
        });
    }

    // Cluster endpoints by proximity
    let mut cluster_of: Vec<Option<usize>> = vec![None; arms.len()];
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for i in 0..arms.len() {
        if cluster_of[i].is_some() {
            continue;
        }
        let id = clusters.len();
        let mut members = vec![i];
        cluster_of[i] = Some(id);
        for j in (i + 1)..arms.len() {
            if cluster_of[j].is_none() && arms[i].position.dist_to(arms[j].position) <= tolerance {
                cluster_of[j] = Some(id);
                members.push(j);
            }
        }
        clusters.push(members);
    }

    for members in &clusters {
        let position = {
            let sum = members
                .iter()
                .fold(Vec2::zero(), |acc, &i| acc + arms[i].position);
            sum * (1.0 / members.len() as f64)
        };
        let kind = match members.len() {
            1 => {
                match mid_spline_touch(&arms[members[0]], splines, tolerance) {
                    Some(kind) => kind,
                    // A plain dead end
                    None => JunctionKind::Endpoint,
                }
            }
            // Two splines continuing into each other isn't a junction
            2 => continue,
            3 => classify_three_way(members, &arms),
            4 => JunctionKind::CrossRoads,
            _ => JunctionKind::Complex,
        };
        network.junctions.push(Junction {
            position,
            kind,
            excluded: false,
            cross_material: false,
        });
    }
}

/// A lone endpoint resting on the interior of another spline (a trimmed roundabout approach on
/// its ring, or an unnoded crossing) is a junction of its own kind.
fn mid_spline_touch(
    arm: &Arm,
    splines: &[AnnotatedRoadSpline],
    tolerance: f64,
) -> Option<JunctionKind> {
    for (idx, other) in splines.iter().enumerate() {
        if idx == arm.spline {
            continue;
        }
        let mut d = 0.0;
        while d <= other.length {
            let p = other.spline.point_at_distance(d);
            if p.dist_to(arm.position) <= tolerance {
                let interior = other.spline.is_closed()
                    || (d > tolerance && d < other.length - tolerance);
                if interior {
                    return Some(JunctionKind::MidSplineCrossing);
                }
            }
            d += CROSS_SECTION_INTERVAL_METERS;
        }
    }
    None
}

fn classify_three_way(members: &[usize], arms: &[Arm]) -> JunctionKind {
    // If some pair of arms runs straight through, the third tees into them
    for (a, b) in [(0, 1), (0, 2), (1, 2)] {
        let d = arms[members[a]].away.dot(arms[members[b]].away);
        let angle = d.clamp(-1.0, 1.0).acos().to_degrees();
        if angle >= 180.0 - T_JUNCTION_STRAIGHT_DEGREES {
            return JunctionKind::TJunction;
        }
    }
    JunctionKind::YJunction
}
