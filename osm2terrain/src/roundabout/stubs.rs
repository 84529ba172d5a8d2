use std::collections::HashMap;

use crate::coords::GeoCoordinate;
use crate::osm::{self, NodeID, WayID};
use crate::{Diagnostics, GeometryKind, OsmQueryResult};

use super::{
    angle_around, coord_key, geo_polyline_length_meters, infer_direction, OsmRoundabout,
    RoundaboutConnection,
};

/// Stubs longer than this are real paths, not mapping artifacts.
const MAX_STUB_LENGTH_METERS: f64 = 100.0;

#[derive(Debug, Default)]
pub struct StubOutcome {
    pub removed_way_ids: Vec<WayID>,
}

/// Collapse short cycleway/footway stubs hanging between a roundabout ring and a nearby road.
/// Mappers often connect a road to a roundabout through a few meters of shared-use path; the
/// road network wants the road itself to reach the ring. Each group of stubs meeting at one
/// divergence node is replaced by extending the best parent road to the ring.
pub fn resolve_stubs(
    query: &mut OsmQueryResult,
    rb: &mut OsmRoundabout,
    diagnostics: &mut Diagnostics,
) -> StubOutcome {
    let ring_keys: HashMap<(i64, i64), usize> = rb
        .ring
        .iter()
        .enumerate()
        .map(|(i, c)| (coord_key(*c), i))
        .collect();

    // Coordinate -> OSM node, built from the original features; the ring itself has no node
    // list, so this is how a ring coordinate recovers its identity
    let mut node_at: HashMap<(i64, i64), NodeID> = HashMap::new();
    for feature in &query.features {
        if feature.node_ids.len() != feature.coordinates.len() {
            continue;
        }
        for (coord, node) in feature.coordinates.iter().zip(&feature.node_ids) {
            node_at.entry(coord_key(*coord)).or_insert(*node);
        }
    }

    // A stub: a short minor path with exactly one endpoint on the ring. Grouped by the other
    // endpoint, the divergence node.
    let mut groups: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (idx, feature) in query.features.iter().enumerate() {
        if feature.kind != GeometryKind::LineString || feature.coordinates.len() < 2 {
            continue;
        }
        if !feature
            .tags
            .is_any(osm::HIGHWAY, vec!["cycleway", "footway", "path"])
        {
            continue;
        }
        if geo_polyline_length_meters(&feature.coordinates) >= MAX_STUB_LENGTH_METERS {
            continue;
        }
        let first = feature.coordinates[0];
        let last = *feature.coordinates.last().unwrap();
        let first_on = ring_keys.contains_key(&coord_key(first));
        let last_on = ring_keys.contains_key(&coord_key(last));
        let divergence = match (first_on, last_on) {
            (true, false) => last,
            (false, true) => first,
            _ => continue,
        };
        groups.entry(coord_key(divergence)).or_default().push(idx);
    }

    let mut outcome = StubOutcome::default();
    let mut group_keys: Vec<(i64, i64)> = groups.keys().copied().collect();
    group_keys.sort();
    for divergence_key in group_keys {
        let stub_indices = &groups[&divergence_key];

        let Some(parent_index) = elect_parent(query, divergence_key) else {
            continue;
        };

        let Some((ring_point, ring_node)) =
            ring_connection_point(query, rb, stub_indices, &ring_keys, &node_at)
        else {
            diagnostics.warn(format!(
                "roundabout {}: no ring point for a stub group; leaving stubs alone",
                rb.id
            ));
            continue;
        };

        // Extend the parent road to the ring from whichever of its ends sits at the
        // divergence node
        let parent = &mut query.features[parent_index];
        let parallel = parent.node_ids.len() == parent.coordinates.len();
        let at_start = coord_key(parent.coordinates[0]) == divergence_key;
        if at_start {
            parent.coordinates.insert(0, ring_point);
            if parallel {
                match ring_node {
                    Some(node) => parent.node_ids.insert(0, node),
                    // Without an id for the new head the whole array would misalign
                    None => parent.node_ids.clear(),
                }
            }
        } else {
            parent.coordinates.push(ring_point);
            if parallel {
                if let Some(node) = ring_node {
                    parent.node_ids.push(node);
                }
            }
        }

        // The stubs are done for; so are their ring connections
        for &idx in stub_indices {
            let stub = &mut query.features[idx];
            outcome.removed_way_ids.push(stub.id);
            let id = stub.id;
            stub.coordinates.clear();
            stub.node_ids.clear();
            rb.connections.retain(|c| c.way_id != id);
        }

        let parent = &query.features[parent_index];
        let parent_id = parent.id;
        let touch_index = if at_start {
            0
        } else {
            parent.coordinates.len() - 1
        };
        rb.connections.retain(|c| c.way_id != parent_id);
        if let Some(&ring_index) = ring_keys.get(&coord_key(ring_point)) {
            rb.connections.push(RoundaboutConnection {
                way_id: parent_id,
                point: ring_point,
                ring_index,
                angle_degrees: angle_around(rb.center, ring_point),
                direction: infer_direction(parent, touch_index),
                feature_index: parent_index,
                touch_index,
            });
        }
        diagnostics.info(format!(
            "roundabout {}: collapsed {} stub(s) into {parent_id}",
            rb.id,
            stub_indices.len()
        ));
    }
    rb.connections
        .sort_by(|a, b| a.angle_degrees.partial_cmp(&b.angle_degrees).unwrap());
    outcome
}

/// The best real road ending at the divergence node: highest highway priority, not a minor
/// path, not part of any roundabout.
fn elect_parent(query: &OsmQueryResult, divergence_key: (i64, i64)) -> Option<usize> {
    let mut best: Option<(i32, usize)> = None;
    for (idx, feature) in query.features.iter().enumerate() {
        if feature.kind != GeometryKind::LineString
            || feature.coordinates.len() < 2
            || feature.is_roundabout_way()
        {
            continue;
        }
        let Some(highway) = feature.highway() else { continue };
        if osm::is_minor_highway(highway) {
            continue;
        }
        let first = coord_key(feature.coordinates[0]);
        let last = coord_key(*feature.coordinates.last().unwrap());
        if first != divergence_key && last != divergence_key {
            continue;
        }
        let priority = osm::highway_priority(highway);
        if best.map_or(true, |(p, _)| priority > p) {
            best = Some((priority, idx));
        }
    }
    best.map(|(_, idx)| idx)
}

/// Where the parent road should meet the ring. One stub donates its own touch point; several
/// stubs average out via the circular mean of their ring angles.
fn ring_connection_point(
    query: &OsmQueryResult,
    rb: &OsmRoundabout,
    stub_indices: &[usize],
    ring_keys: &HashMap<(i64, i64), usize>,
    node_at: &HashMap<(i64, i64), NodeID>,
) -> Option<(GeoCoordinate, Option<NodeID>)> {
    let touch_point = |idx: usize| -> Option<GeoCoordinate> {
        let coords = &query.features[idx].coordinates;
        for c in [coords[0], *coords.last().unwrap()] {
            if ring_keys.contains_key(&coord_key(c)) {
                return Some(c);
            }
        }
        None
    };

    if stub_indices.len() == 1 {
        let point = touch_point(stub_indices[0])?;
        let node = node_at.get(&coord_key(point)).copied();
        return Some((point, node));
    }

    let mut sum = (0.0, 0.0);
    for &idx in stub_indices {
        let point = touch_point(idx)?;
        let angle = angle_around(rb.center, point).to_radians();
        sum.0 += angle.cos();
        sum.1 += angle.sin();
    }
    let mean = sum.1.atan2(sum.0).to_degrees().rem_euclid(360.0);

    let closest = rb.ring[..rb.ring.len() - 1]
        .iter()
        .min_by(|a, b| {
            let da = angle_gap(angle_around(rb.center, **a), mean);
            let db = angle_gap(angle_around(rb.center, **b), mean);
            da.partial_cmp(&db).unwrap()
        })
        .copied()?;
    let node = node_at.get(&coord_key(closest)).copied();
    Some((closest, node))
}

fn angle_gap(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

#[cfg(test)]
mod tests {
    use super::super::{coords_match, detect_roundabouts, tests::ring_fixture};
    use super::*;
    use crate::tags::Tags;
    use crate::OsmFeature;

    /// Detach the east approach from the ring and wire it up through two short cycleway stubs
    /// meeting at the old junction.
    fn fixture_with_stubs() -> (OsmQueryResult, GeoCoordinate) {
        let mut query = ring_fixture();
        let mut diagnostics = Diagnostics::new();
        let ring = detect_roundabouts(&query, &mut diagnostics)[0].ring.clone();

        // The east approach now stops short of the ring at a divergence point
        let touch = query.features[4].coordinates[1];
        let divergence = GeoCoordinate::new(touch.lon + 0.0001, touch.lat);
        query.features[4].coordinates[1] = divergence;

        let mut cycleway = Tags::new();
        cycleway.insert("highway", "cycleway");
        // Two stubs from the divergence point to two adjacent ring coordinates
        let touch_idx = ring
            .iter()
            .position(|c| coords_match(*c, touch))
            .unwrap();
        let next = ring[(touch_idx + 1) % (ring.len() - 1)];
        query.features.push(OsmFeature::new_line(
            WayID(300),
            cycleway.clone(),
            vec![divergence, touch],
            vec![NodeID(60), NodeID(0)],
        ));
        query.features.push(OsmFeature::new_line(
            WayID(301),
            cycleway,
            vec![divergence, next],
            vec![NodeID(60), NodeID(1)],
        ));
        (query, divergence)
    }

    #[test]
    fn stubs_collapse_into_parent() {
        let (mut query, divergence) = fixture_with_stubs();
        let mut diagnostics = Diagnostics::new();
        let mut rbs = detect_roundabouts(&query, &mut diagnostics);
        let removed = resolve_stubs(&mut query, &mut rbs[0], &mut diagnostics);

        assert_eq!(removed.removed_way_ids, vec![WayID(300), WayID(301)]);
        // Stubs are gone
        assert!(query.features[6].coordinates.is_empty());
        assert!(query.features[7].coordinates.is_empty());
        // The parent was extended from the divergence point onto the ring
        let parent = &query.features[4];
        assert_eq!(parent.coordinates.len(), 3);
        assert!(coords_match(parent.coordinates[1], divergence));
        assert_eq!(parent.coordinates.len(), parent.node_ids.len());
        // And the roundabout now lists the parent, not the stubs
        let rb = &rbs[0];
        assert!(rb.connections.iter().any(|c| c.way_id == WayID(200)));
        assert!(!rb.connections.iter().any(|c| c.way_id == WayID(300)));
    }
}
