use std::collections::HashMap;

use crate::coords::GeoCoordinate;
use crate::osm::{self, WayID};
use crate::types::TerrainConfig;
use crate::{Diagnostics, GeometryKind, OsmQueryResult};

use super::{
    angle_around, coord_key, geo_dist_meters, infer_direction, OsmRoundabout, RoundaboutConnection,
};

#[derive(Debug, Default)]
pub struct TrimOutcome {
    /// Ways that lay entirely on the ring and were removed.
    pub deleted_way_ids: Vec<WayID>,
    /// The removed pieces, for the debug image.
    pub trimmed_segments: Vec<Vec<GeoCoordinate>>,
}

/// Remove the parts of connecting roads that run along the roundabout ring. OSM often draws an
/// approach road overlapping the ring for a few meters; left alone, those points drag the road
/// spline onto the circle.
pub fn trim_connecting_roads(
    query: &mut OsmQueryResult,
    rb: &mut OsmRoundabout,
    config: &TerrainConfig,
    diagnostics: &mut Diagnostics,
) -> TrimOutcome {
    let ring_keys: HashMap<(i64, i64), usize> = rb
        .ring
        .iter()
        .enumerate()
        .map(|(i, c)| (coord_key(*c), i))
        .collect();

    let mut outcome = TrimOutcome::default();
    for feature_index in 0..query.features.len() {
        let feature = &query.features[feature_index];
        if feature.kind != GeometryKind::LineString
            || feature.is_roundabout_way()
            || !feature.tags.contains_key(osm::HIGHWAY)
            || feature.coordinates.len() < 2
        {
            continue;
        }

        let on_ring: Vec<bool> = feature
            .coordinates
            .iter()
            .map(|c| {
                ring_keys.contains_key(&coord_key(*c))
                    || (geo_dist_meters(rb.center, *c) - rb.radius_meters).abs()
                        <= config.roundabout_overlap_tolerance_meters
            })
            .collect();

        let decision = decide(&on_ring);
        match decision {
            Decision::Intact => {}
            Decision::Delete => {
                let feature = &mut query.features[feature_index];
                outcome.trimmed_segments.push(feature.coordinates.clone());
                outcome.deleted_way_ids.push(feature.id);
                feature.coordinates.clear();
                feature.node_ids.clear();
                let id = feature.id;
                rb.connections.retain(|c| c.way_id != id);
                diagnostics.info(format!("{id} lies entirely on roundabout {}; removed", rb.id));
            }
            Decision::Keep { start, count } => {
                let feature = &mut query.features[feature_index];
                let len = feature.coordinates.len();
                if start > 0 {
                    outcome
                        .trimmed_segments
                        .push(feature.coordinates[..=start.min(len - 1)].to_vec());
                }
                if start + count < len {
                    outcome
                        .trimmed_segments
                        .push(feature.coordinates[start + count - 1..].to_vec());
                }
                feature.coordinates = feature.coordinates[start..start + count].to_vec();
                // node_ids may already be shorter from cropping; slice what's there so the
                // arrays stay in lockstep where they were in lockstep before
                let node_len = feature.node_ids.len();
                if node_len == len {
                    feature.node_ids = feature.node_ids[start..start + count].to_vec();
                } else {
                    let lo = start.min(node_len);
                    let hi = (start + count).min(node_len);
                    feature.node_ids = feature.node_ids[lo..hi].to_vec();
                }
                refresh_connection(query, rb, feature_index, &ring_keys);
            }
        }
    }
    outcome
}

enum Decision {
    Intact,
    Delete,
    /// Keep `coordinates[start..start + count]`.
    Keep { start: usize, count: usize },
}

fn decide(on_ring: &[bool]) -> Decision {
    let len = on_ring.len();
    let any_on = on_ring.iter().any(|&b| b);
    if !any_on {
        return Decision::Intact;
    }
    if on_ring.iter().all(|&b| b) {
        return Decision::Delete;
    }
    let transitions: Vec<usize> = (0..len - 1).filter(|&i| on_ring[i] != on_ring[i + 1]).collect();
    let first_on = on_ring.iter().position(|&b| b).unwrap();
    let last_on = len - 1 - on_ring.iter().rev().position(|&b| b).unwrap();

    match transitions.len() {
        1 => {
            if !on_ring[0] {
                // Road approaches and enters the ring: keep through the entry point
                Decision::Keep {
                    start: 0,
                    count: first_on + 1,
                }
            } else {
                // Road exits the ring and leaves: keep from the exit point
                Decision::Keep {
                    start: last_on,
                    count: len - last_on,
                }
            }
        }
        2 if on_ring[0] && on_ring[len - 1] => {
            // Touches the ring only at both ends; the middle is genuinely off-ring
            Decision::Intact
        }
        _ if !on_ring[0] || !on_ring[len - 1] => {
            // Passes through the ring: keep the longer approach
            let pre = first_on + 1;
            let post = len - last_on;
            if pre >= post {
                Decision::Keep { start: 0, count: pre }
            } else {
                Decision::Keep {
                    start: last_on,
                    count: post,
                }
            }
        }
        _ => longest_off_run(on_ring),
    }
}

fn longest_off_run(on_ring: &[bool]) -> Decision {
    let mut best = (0, 0);
    let mut run_start = None;
    for (i, &on) in on_ring.iter().enumerate() {
        match (on, run_start) {
            (false, None) => run_start = Some(i),
            (true, Some(s)) => {
                if i - s > best.1 {
                    best = (s, i - s);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = run_start {
        if on_ring.len() - s > best.1 {
            best = (s, on_ring.len() - s);
        }
    }
    if best.1 < 2 {
        Decision::Delete
    } else {
        Decision::Keep {
            start: best.0,
            count: best.1,
        }
    }
}

/// After a trim, the way's connection to the ring moved to its new cut point; rewrite the
/// roundabout's entries for this way.
fn refresh_connection(
    query: &OsmQueryResult,
    rb: &mut OsmRoundabout,
    feature_index: usize,
    ring_keys: &HashMap<(i64, i64), usize>,
) {
    let feature = &query.features[feature_index];
    if feature.coordinates.is_empty() {
        return;
    }
    let id = feature.id;
    rb.connections.retain(|c| c.way_id != id);
    let last = feature.coordinates.len() - 1;
    for touch_index in [0, last] {
        let coord = feature.coordinates[touch_index];
        if let Some(&ring_index) = ring_keys.get(&coord_key(coord)) {
            rb.connections.push(RoundaboutConnection {
                way_id: id,
                point: coord,
                ring_index,
                angle_degrees: angle_around(rb.center, coord),
                direction: infer_direction(feature, touch_index),
                feature_index,
                touch_index,
            });
            if last == 0 {
                break;
            }
        }
    }
    rb.connections
        .sort_by(|a, b| a.angle_degrees.partial_cmp(&b.angle_degrees).unwrap());
}

#[cfg(test)]
mod tests {
    use super::super::{detect_roundabouts, tests::ring_fixture};
    use super::*;

    fn masked(mask: &[bool]) -> Decision {
        decide(mask)
    }

    #[test]
    fn decision_tree() {
        // No contact
        assert!(matches!(masked(&[false, false, false]), Decision::Intact));
        // Entirely on the ring
        assert!(matches!(masked(&[true, true, true]), Decision::Delete));
        // Approach: keep prefix through the entry point
        match masked(&[false, false, true, true]) {
            Decision::Keep { start: 0, count: 3 } => {}
            other => panic!("{:?}", discriminant_name(&other)),
        }
        // Departure: keep suffix from the exit point
        match masked(&[true, true, false, false]) {
            Decision::Keep { start: 1, count: 3 } => {}
            other => panic!("{:?}", discriminant_name(&other)),
        }
        // Touching at both ends only
        assert!(matches!(masked(&[true, false, false, true]), Decision::Intact));
        // Pass-through: longer side wins (the tail here)
        match masked(&[false, true, true, false, false, false]) {
            Decision::Keep { start: 2, count: 4 } => {}
            other => panic!("{:?}", discriminant_name(&other)),
        }
    }

    fn discriminant_name(d: &Decision) -> &'static str {
        match d {
            Decision::Intact => "Intact",
            Decision::Delete => "Delete",
            Decision::Keep { .. } => "Keep",
        }
    }

    #[test]
    fn overlapping_approach_gets_cut() {
        let mut query = ring_fixture();
        let mut diagnostics = Diagnostics::new();
        // Extend the east approach so it runs along the ring: append the next two ring
        // coordinates after its touch point
        let ring_pts = {
            let rbs = detect_roundabouts(&query, &mut diagnostics);
            rbs[0].ring.clone()
        };
        let touch = query.features[4].coordinates[1];
        let touch_ring_idx = ring_pts.iter().position(|c| super::super::coords_match(*c, touch)).unwrap();
        let next1 = ring_pts[(touch_ring_idx + 1) % (ring_pts.len() - 1)];
        let next2 = ring_pts[(touch_ring_idx + 2) % (ring_pts.len() - 1)];
        query.features[4].coordinates.extend([next1, next2]);
        query.features[4]
            .node_ids
            .extend([crate::osm::NodeID(900), crate::osm::NodeID(901)]);

        let mut rbs = detect_roundabouts(&query, &mut diagnostics);
        let before_len = query.features[4].coordinates.len();
        assert_eq!(before_len, 4);
        let config = TerrainConfig::default_for(1024, 1.0);
        trim_connecting_roads(&mut query, &mut rbs[0], &config, &mut diagnostics);

        let feature = &query.features[4];
        // The two on-ring trailing points are gone; the touch point survives
        assert_eq!(feature.coordinates.len(), 2);
        assert_eq!(feature.node_ids.len(), 2);
        assert!(super::super::coords_match(feature.coordinates[1], touch));
        // The connection entry still points at the cut
        let rb = &rbs[0];
        let conn = rb.connections.iter().find(|c| c.way_id == WayID(200)).unwrap();
        assert!(super::super::coords_match(conn.point, touch));
    }

    #[test]
    fn arrays_stay_parallel() {
        let mut query = ring_fixture();
        let mut diagnostics = Diagnostics::new();
        let mut rbs = detect_roundabouts(&query, &mut diagnostics);
        let config = TerrainConfig::default_for(1024, 1.0);
        for rb in &mut rbs {
            trim_connecting_roads(&mut query, rb, &config, &mut diagnostics);
        }
        for f in &query.features {
            if !f.coordinates.is_empty() {
                assert_eq!(f.coordinates.len(), f.node_ids.len(), "{}", f.id);
            }
        }
    }
}
