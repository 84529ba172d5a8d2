use std::collections::HashMap;

use crate::paths::PathWithMetadata;
use crate::{Diagnostics, MemberRole, RouteRelation, WayID};

use super::{merge_paths, MergeKind};

/// Tangents more opposed than this count as a U-turn when both ways are one-way.
const U_TURN_DOT: f64 = -0.7;

/// Pre-merge paths along the ordering of OSM route relations. A relation's member list is
/// ground truth about which fragments belong together, so no junction-valence guard applies
/// here; only shared-node validation and the one-way U-turn check gate each merge.
pub fn merge_route_relations(
    paths: Vec<PathWithMetadata>,
    relations: &[RouteRelation],
    diagnostics: &mut Diagnostics,
) -> Vec<PathWithMetadata> {
    let mut slots: Vec<Option<PathWithMetadata>> = paths.into_iter().map(Some).collect();

    // First occurrence wins; a way cropped into several paths keeps only its first piece
    // eligible for relation-guided merging.
    let mut by_way: HashMap<WayID, usize> = HashMap::new();
    for (idx, slot) in slots.iter().enumerate() {
        if let Some(path) = slot {
            by_way.entry(path.way_id).or_insert(idx);
        }
    }

    let mut merged_count = 0;
    for relation in relations {
        // The slot currently accumulating this relation's contiguous run
        let mut current: Option<usize> = None;
        for member in &relation.members {
            let idx = match by_way.get(&member.way) {
                Some(idx) if slots[*idx].is_some() => *idx,
                // Missing or already consumed; the contiguous run is broken
                _ => {
                    current = None;
                    continue;
                }
            };
            let Some(acc) = current else {
                current = Some(idx);
                continue;
            };
            if acc == idx {
                continue;
            }
            match try_merge(slots[acc].as_ref().unwrap(), slots[idx].as_ref().unwrap(), member.role)
            {
                Some(merged) => {
                    slots[acc] = Some(merged);
                    slots[idx] = None;
                    merged_count += 1;
                }
                None => {
                    // Couldn't join; continue the walk from this member
                    current = Some(idx);
                }
            }
        }
    }
    if merged_count > 0 {
        diagnostics.info(format!("route relations pre-merged {merged_count} way pairs"));
    }

    slots.into_iter().flatten().collect()
}

/// The four endpoint combinations, ordered by the role hint first.
fn merge_order(role: MemberRole) -> [MergeKind; 4] {
    match role {
        MemberRole::Backward => [
            MergeKind::EndEnd,
            MergeKind::EndStart,
            MergeKind::StartEnd,
            MergeKind::StartStart,
        ],
        _ => [
            MergeKind::EndStart,
            MergeKind::EndEnd,
            MergeKind::StartEnd,
            MergeKind::StartStart,
        ],
    }
}

fn try_merge(
    p1: &PathWithMetadata,
    p2: &PathWithMetadata,
    role: MemberRole,
) -> Option<PathWithMetadata> {
    if p1.points.len() < 2 || p2.points.len() < 2 {
        return None;
    }
    for kind in merge_order(role) {
        let (n1, n2) = kind.connecting_nodes(p1, p2);
        match (n1, n2) {
            (Some(a), Some(b)) if a == b => {}
            _ => continue,
        }
        if p1.is_oneway() && p2.is_oneway() && is_u_turn(p1, p2, kind) {
            continue;
        }
        return Some(merge_paths(p1, p2, kind));
    }
    None
}

/// Deflection test using the segments adjacent to the connection.
fn is_u_turn(p1: &PathWithMetadata, p2: &PathWithMetadata, kind: MergeKind) -> bool {
    let conn = kind.connection_point(p1);
    let into = match kind {
        MergeKind::EndStart | MergeKind::EndEnd => p1.points[p1.points.len() - 2],
        MergeKind::StartEnd | MergeKind::StartStart => p1.points[1],
    };
    let out_of = match kind {
        MergeKind::EndStart | MergeKind::StartEnd => p2.points[1],
        MergeKind::EndEnd | MergeKind::StartStart => p2.points[p2.points.len() - 2],
    };
    // For StartEnd/StartStart travel runs p2 -> p1, which flips both vectors; the dot product
    // is the same either way.
    let dir_in = match (conn - into).normalized() {
        Some(d) => d,
        None => return false,
    };
    let dir_out = match (out_of - conn).normalized() {
        Some(d) => d,
        None => return false,
    };
    dir_in.dot(dir_out) < U_TURN_DOT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec2;
    use crate::osm::{NodeID, RelationID};
    use crate::tags::Tags;
    use crate::RouteMember;

    fn path(way: i64, pts: Vec<(f64, f64)>, start: Option<i64>, end: Option<i64>) -> PathWithMetadata {
        PathWithMetadata {
            points: pts.into_iter().map(|(x, y)| Vec2::new(x, y)).collect(),
            start_node: start.map(NodeID),
            end_node: end.map(NodeID),
            way_id: WayID(way),
            tags: Tags::new(),
            is_bridge: false,
            is_tunnel: false,
            layer: 0,
            route_relations: vec![RelationID(1)],
        }
    }

    fn relation(ways: Vec<i64>) -> RouteRelation {
        RouteRelation {
            id: RelationID(1),
            members: ways
                .into_iter()
                .map(|w| RouteMember {
                    way: WayID(w),
                    role: MemberRole::None,
                })
                .collect(),
        }
    }

    #[test]
    fn three_consecutive_ways_become_one_path() {
        let paths = vec![
            path(1, vec![(0.0, 0.0), (10.0, 0.0)], Some(1), Some(2)),
            path(2, vec![(10.0, 0.0), (20.0, 0.0)], Some(2), Some(3)),
            path(3, vec![(20.0, 0.0), (30.0, 0.0)], Some(3), Some(4)),
        ];
        let mut diagnostics = Diagnostics::new();
        let out = merge_route_relations(paths, &[relation(vec![1, 2, 3])], &mut diagnostics);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].points.len(), 4);
        assert_eq!(out[0].points[0], Vec2::new(0.0, 0.0));
        assert_eq!(out[0].points[3], Vec2::new(30.0, 0.0));
        assert_eq!(out[0].start_node, Some(NodeID(1)));
        assert_eq!(out[0].end_node, Some(NodeID(4)));
        assert_eq!(out[0].way_id, WayID(1));
    }

    #[test]
    fn reversed_member_still_joins() {
        // Way 2 is drawn backwards relative to the route
        let paths = vec![
            path(1, vec![(0.0, 0.0), (10.0, 0.0)], Some(1), Some(2)),
            path(2, vec![(20.0, 0.0), (10.0, 0.0)], Some(3), Some(2)),
        ];
        let mut diagnostics = Diagnostics::new();
        let out = merge_route_relations(paths, &[relation(vec![1, 2])], &mut diagnostics);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].points, vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(20.0, 0.0)
        ]);
        assert_eq!(out[0].end_node, Some(NodeID(3)));
    }

    #[test]
    fn no_shared_node_no_merge() {
        let paths = vec![
            path(1, vec![(0.0, 0.0), (10.0, 0.0)], Some(1), Some(2)),
            path(2, vec![(10.0, 0.0), (20.0, 0.0)], Some(7), Some(8)),
        ];
        let mut diagnostics = Diagnostics::new();
        let out = merge_route_relations(paths, &[relation(vec![1, 2])], &mut diagnostics);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn oneway_u_turn_rejected() {
        let mut a = path(1, vec![(0.0, 0.0), (10.0, 0.0)], Some(1), Some(2));
        // Shares node 2 at both ends, but doubles straight back
        let mut b = path(2, vec![(10.0, 0.0), (0.0, 0.1)], Some(2), Some(3));
        a.tags.insert("oneway", "yes");
        b.tags.insert("oneway", "yes");
        let mut diagnostics = Diagnostics::new();
        let out = merge_route_relations(vec![a, b], &[relation(vec![1, 2])], &mut diagnostics);
        assert_eq!(out.len(), 2);
    }
}
