use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::unionfind::UnionFind;

use crate::coords::{meters_per_degree, GeoCoordinate};
use crate::osm::{self, WayID};
use crate::tags::Tags;
use crate::types::ConnectionDirection;
use crate::{Diagnostics, GeometryKind, OsmQueryResult};

mod merge;
mod stubs;
mod trim;

pub use merge::{merge_roundabout, ProcessedRoundaboutInfo, RingConnection};
pub use stubs::{resolve_stubs, StubOutcome};
pub use trim::{trim_connecting_roads, TrimOutcome};

/// Two coordinates this close in degrees are the same OSM position, roughly 0.1 m at the
/// equator.
pub const RING_COORD_TOLERANCE_DEGREES: f64 = 1e-6;

/// One physical roundabout assembled from `junction=roundabout` ways.
#[derive(Clone, Debug)]
pub struct OsmRoundabout {
    pub id: usize,
    pub way_ids: BTreeSet<WayID>,
    /// Closed: the first coordinate repeats at the end, within tolerance.
    pub ring: Vec<GeoCoordinate>,
    pub center: GeoCoordinate,
    pub radius_meters: f64,
    pub tags: Tags,
    pub connections: Vec<RoundaboutConnection>,
}

/// Where a road touches the ring. Borrows the connecting feature by index; nothing points back.
#[derive(Clone, Debug)]
pub struct RoundaboutConnection {
    pub way_id: WayID,
    pub point: GeoCoordinate,
    pub ring_index: usize,
    /// Around the centroid: 0 = East, counterclockwise, degrees.
    pub angle_degrees: f64,
    pub direction: ConnectionDirection,
    /// Index into `OsmQueryResult::features`.
    pub feature_index: usize,
    /// Index of the touching coordinate along that feature.
    pub touch_index: usize,
}

/// Quantized coordinate for hashing; positions within tolerance share a key.
pub(crate) fn coord_key(c: GeoCoordinate) -> (i64, i64) {
    (
        (c.lon / RING_COORD_TOLERANCE_DEGREES).round() as i64,
        (c.lat / RING_COORD_TOLERANCE_DEGREES).round() as i64,
    )
}

pub(crate) fn coords_match(a: GeoCoordinate, b: GeoCoordinate) -> bool {
    (a.lon - b.lon).abs() <= RING_COORD_TOLERANCE_DEGREES
        && (a.lat - b.lat).abs() <= RING_COORD_TOLERANCE_DEGREES
}

/// Planar distance in meters between two geographic coordinates, using the spherical
/// approximation at their mean latitude.
pub(crate) fn geo_dist_meters(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let (m_lon, m_lat) = meters_per_degree((a.lat + b.lat) / 2.0);
    ((a.lon - b.lon) * m_lon).hypot((a.lat - b.lat) * m_lat)
}

pub(crate) fn geo_polyline_length_meters(coords: &[GeoCoordinate]) -> f64 {
    coords.windows(2).map(|w| geo_dist_meters(w[0], w[1])).sum()
}

/// The angle of `pt` around `center`, 0 = East, counterclockwise, in degrees [0, 360).
pub(crate) fn angle_around(center: GeoCoordinate, pt: GeoCoordinate) -> f64 {
    let (m_lon, m_lat) = meters_per_degree(center.lat);
    let dx = (pt.lon - center.lon) * m_lon;
    let dy = (pt.lat - center.lat) * m_lat;
    let deg = dy.atan2(dx).to_degrees();
    if deg < 0.0 {
        deg + 360.0
    } else {
        deg
    }
}

/// Find every physical roundabout in the query: group `junction=roundabout` ways by shared
/// endpoints, stitch each group into a closed ring, and record where other highways touch it.
pub fn detect_roundabouts(
    query: &OsmQueryResult,
    diagnostics: &mut Diagnostics,
) -> Vec<OsmRoundabout> {
    let ring_ways: Vec<usize> = query
        .features
        .iter()
        .enumerate()
        .filter(|(_, f)| {
            f.kind == GeometryKind::LineString
                && f.is_roundabout_way()
                && f.coordinates.len() >= 2
        })
        .map(|(idx, _)| idx)
        .collect();
    if ring_ways.is_empty() {
        return Vec::new();
    }

    // Transitive closure over shared endpoints: two ways touching end-to-end belong to the
    // same physical roundabout.
    let mut uf: UnionFind<usize> = UnionFind::new(ring_ways.len());
    let mut endpoint_owner: HashMap<(i64, i64), usize> = HashMap::new();
    for (local, &feature_idx) in ring_ways.iter().enumerate() {
        let coords = &query.features[feature_idx].coordinates;
        for endpoint in [coords[0], *coords.last().unwrap()] {
            match endpoint_owner.entry(coord_key(endpoint)) {
                std::collections::hash_map::Entry::Occupied(e) => {
                    uf.union(*e.get(), local);
                }
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(local);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (local, &feature_idx) in ring_ways.iter().enumerate() {
        groups.entry(uf.find(local)).or_default().push(feature_idx);
    }

    let mut roundabouts = Vec::new();
    let mut group_keys: Vec<usize> = groups.keys().copied().collect();
    group_keys.sort();
    for key in group_keys {
        let members = &groups[&key];
        if let Some(rb) = assemble_ring(query, roundabouts.len(), members, diagnostics) {
            roundabouts.push(rb);
        }
    }

    for rb in &mut roundabouts {
        detect_connections(query, rb);
    }
    roundabouts
}

fn assemble_ring(
    query: &OsmQueryResult,
    id: usize,
    members: &[usize],
    diagnostics: &mut Diagnostics,
) -> Option<OsmRoundabout> {
    // Longest way anchors the ring; the rest attach wherever their endpoints fit
    let mut remaining: Vec<usize> = members.to_vec();
    remaining.sort_by(|a, b| {
        let la = geo_polyline_length_meters(&query.features[*a].coordinates);
        let lb = geo_polyline_length_meters(&query.features[*b].coordinates);
        lb.partial_cmp(&la).unwrap()
    });
    let anchor = remaining.remove(0);
    let mut ring: Vec<GeoCoordinate> = query.features[anchor].coordinates.clone();

    while !remaining.is_empty() {
        let mut attached = None;
        'search: for (pos, &idx) in remaining.iter().enumerate() {
            let coords = &query.features[idx].coordinates;
            let ring_start = ring[0];
            let ring_end = *ring.last().unwrap();
            if coords_match(coords[0], ring_end) {
                ring.extend_from_slice(&coords[1..]);
            } else if coords_match(*coords.last().unwrap(), ring_end) {
                ring.extend(coords[..coords.len() - 1].iter().rev().copied());
            } else if coords_match(*coords.last().unwrap(), ring_start) {
                let mut new_ring = coords[..coords.len() - 1].to_vec();
                new_ring.extend_from_slice(&ring);
                ring = new_ring;
            } else if coords_match(coords[0], ring_start) {
                let mut new_ring: Vec<GeoCoordinate> = coords[1..].iter().rev().copied().collect();
                new_ring.extend_from_slice(&ring);
                ring = new_ring;
            } else {
                continue;
            }
            attached = Some(pos);
            break 'search;
        }
        match attached {
            Some(pos) => {
                remaining.remove(pos);
            }
            None => {
                diagnostics.warn(format!(
                    "roundabout {id}: {} ring segments couldn't be attached",
                    remaining.len()
                ));
                break;
            }
        }
    }

    if !coords_match(ring[0], *ring.last().unwrap()) {
        diagnostics.warn(format!("roundabout {id}: ring didn't close; forcing closure"));
        ring.push(ring[0]);
    }
    if ring.len() < 4 {
        // Closed means first == last, so 4 entries is a triangle
        diagnostics.warn(format!("roundabout {id}: only {} ring points; skipping", ring.len()));
        return None;
    }

    let interior = &ring[..ring.len() - 1];
    let center = GeoCoordinate::new(
        interior.iter().map(|c| c.lon).sum::<f64>() / interior.len() as f64,
        interior.iter().map(|c| c.lat).sum::<f64>() / interior.len() as f64,
    );
    let radius_meters =
        interior.iter().map(|c| geo_dist_meters(center, *c)).sum::<f64>() / interior.len() as f64;

    let mut way_ids = BTreeSet::new();
    for &idx in members {
        way_ids.insert(query.features[idx].id);
    }
    // Tags of the longest member describe the ring
    let anchor_tags = query.features[anchor].tags.clone();

    Some(OsmRoundabout {
        id,
        way_ids,
        ring,
        center,
        radius_meters,
        tags: anchor_tags,
        connections: Vec::new(),
    })
}

fn detect_connections(query: &OsmQueryResult, rb: &mut OsmRoundabout) {
    let mut ring_index: HashMap<(i64, i64), usize> = HashMap::new();
    for (i, c) in rb.ring.iter().enumerate() {
        ring_index.entry(coord_key(*c)).or_insert(i);
    }

    let mut seen: HashSet<(WayID, usize)> = HashSet::new();
    for (feature_index, feature) in query.features.iter().enumerate() {
        if feature.kind != GeometryKind::LineString
            || feature.is_roundabout_way()
            || !feature.tags.contains_key(osm::HIGHWAY)
        {
            continue;
        }
        for (touch_index, coord) in feature.coordinates.iter().enumerate() {
            let Some(&ring_idx) = ring_index.get(&coord_key(*coord)) else {
                continue;
            };
            if !seen.insert((feature.id, ring_idx)) {
                continue;
            }
            rb.connections.push(RoundaboutConnection {
                way_id: feature.id,
                point: *coord,
                ring_index: ring_idx,
                angle_degrees: angle_around(rb.center, *coord),
                direction: infer_direction(feature, touch_index),
                feature_index,
                touch_index,
            });
        }
    }
    rb.connections
        .sort_by(|a, b| a.angle_degrees.partial_cmp(&b.angle_degrees).unwrap());
}

/// Whether traffic enters or leaves the ring through this touch point, from the `oneway` tag and
/// which end of the way touches. Cropped ways lost the drawing order their node list encoded, so
/// they fall back to bidirectional.
pub(crate) fn infer_direction(feature: &crate::OsmFeature, touch_index: usize) -> ConnectionDirection {
    if !feature.is_oneway() || feature.node_ids.len() != feature.coordinates.len() {
        return ConnectionDirection::Bidirectional;
    }
    let reversed = feature.is_reverse_oneway();
    if touch_index == 0 {
        // Traffic flows away from the first coordinate on a forward one-way
        if reversed {
            ConnectionDirection::Entry
        } else {
            ConnectionDirection::Exit
        }
    } else if touch_index == feature.coordinates.len() - 1 {
        if reversed {
            ConnectionDirection::Exit
        } else {
            ConnectionDirection::Entry
        }
    } else {
        ConnectionDirection::Bidirectional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::NodeID;
    use crate::OsmFeature;

    /// Four arcs of a 16-point circle of radius ~30 m at the equator, plus two residential
    /// approach roads touching opposite sides.
    pub(crate) fn ring_fixture() -> OsmQueryResult {
        let center = GeoCoordinate::new(0.01, 0.01);
        let radius_deg = 30.0 / 111_320.0;
        let ring_pt = |i: usize| {
            let a = (i as f64) * std::f64::consts::TAU / 16.0;
            GeoCoordinate::new(center.lon + radius_deg * a.cos(), center.lat + radius_deg * a.sin())
        };
        let mut features = Vec::new();
        let mut roundabout_tags = Tags::new();
        roundabout_tags.insert("highway", "primary");
        roundabout_tags.insert("junction", "roundabout");
        // 4 arcs: nodes 0..4, 4..8, 8..12, 12..16(=0)
        for arc in 0..4 {
            let coords: Vec<GeoCoordinate> = (arc * 4..=arc * 4 + 4).map(|i| ring_pt(i % 16)).collect();
            let node_ids: Vec<NodeID> = (arc * 4..=arc * 4 + 4).map(|i| NodeID((i % 16) as i64)).collect();
            features.push(OsmFeature {
                id: WayID(100 + arc as i64),
                category: "highway".to_string(),
                tags: roundabout_tags.clone(),
                kind: GeometryKind::LineString,
                coordinates: coords,
                node_ids,
                inner_rings: Vec::new(),
                outer_parts: Vec::new(),
            });
        }
        // Approach from the east touches ring point 0, from the west touches ring point 8
        let mut residential = Tags::new();
        residential.insert("highway", "residential");
        features.push(OsmFeature::new_line(
            WayID(200),
            residential.clone(),
            vec![GeoCoordinate::new(center.lon + 3.0 * radius_deg, center.lat), ring_pt(0)],
            vec![NodeID(50), NodeID(0)],
        ));
        features.push(OsmFeature::new_line(
            WayID(201),
            residential,
            vec![GeoCoordinate::new(center.lon - 3.0 * radius_deg, center.lat), ring_pt(8)],
            vec![NodeID(51), NodeID(8)],
        ));
        OsmQueryResult {
            features,
            route_relations: Vec::new(),
            structures: Vec::new(),
        }
    }

    #[test]
    fn four_arcs_one_ring() {
        let query = ring_fixture();
        let mut diagnostics = Diagnostics::new();
        let rbs = detect_roundabouts(&query, &mut diagnostics);
        assert_eq!(rbs.len(), 1);
        let rb = &rbs[0];
        assert_eq!(rb.way_ids.len(), 4);
        // Closed ring through all 16 distinct points
        assert_eq!(rb.ring.len(), 17);
        assert!(coords_match(rb.ring[0], *rb.ring.last().unwrap()));
        assert!((rb.radius_meters - 30.0).abs() < 1.0);
        assert!(geo_dist_meters(rb.center, GeoCoordinate::new(0.01, 0.01)) < 1.0);
    }

    #[test]
    fn connections_found_on_opposite_sides() {
        let query = ring_fixture();
        let mut diagnostics = Diagnostics::new();
        let rbs = detect_roundabouts(&query, &mut diagnostics);
        let rb = &rbs[0];
        assert_eq!(rb.connections.len(), 2);
        let diff = (rb.connections[1].angle_degrees - rb.connections[0].angle_degrees).abs();
        assert!((diff - 180.0).abs() < 5.0, "angles {diff}");
        // No oneway tags: both bidirectional
        assert!(rb
            .connections
            .iter()
            .all(|c| c.direction == ConnectionDirection::Bidirectional));
    }

    #[test]
    fn oneway_direction_inference() {
        let mut query = ring_fixture();
        // Way 200 (east approach, touches at its end): oneway=yes means traffic enters
        query.features[4].tags.insert("oneway", "yes");
        let mut diagnostics = Diagnostics::new();
        let rbs = detect_roundabouts(&query, &mut diagnostics);
        let conn = rbs[0]
            .connections
            .iter()
            .find(|c| c.way_id == WayID(200))
            .unwrap();
        assert_eq!(conn.direction, ConnectionDirection::Entry);
    }
}
