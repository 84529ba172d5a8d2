use std::collections::HashMap;

use crate::osm::NodeID;
use crate::paths::PathWithMetadata;
use crate::types::{CancelFlag, TerrainConfig};
use crate::Diagnostics;

use super::{merge_paths, MergeKind};

/// How far along each path to walk when estimating its approach direction. Short enough to
/// stay local, long enough to smooth over jittery tagging.
const DIRECTION_WALK_METERS: f64 = 30.0;
/// Endpoint nodes used by at least this many ways are junctions.
const JUNCTION_VALENCE: u32 = 3;
/// Safety cap; exceeding it yields a warning and a best-effort partial result.
const MAX_MERGES: usize = 10_000;

const SHARED_NODE_BONUS: f64 = 0.5;
const SHARED_ROUTE_BONUS: f64 = 0.5;
const REVERSAL_PENALTY: f64 = 0.001;

/// Greedy angle-first joining of the fragments that route relations didn't already merge. Each
/// round scores every endpoint pairing globally and executes the single best merge, so a
/// fragment always joins its straightest continuation, not just the first acceptable one.
pub fn connect_paths(
    paths: Vec<PathWithMetadata>,
    valence: &HashMap<NodeID, u32>,
    config: &TerrainConfig,
    diagnostics: &mut Diagnostics,
    cancel: &CancelFlag,
) -> Vec<PathWithMetadata> {
    let mut slots: Vec<Option<PathWithMetadata>> = paths.into_iter().map(Some).collect();
    let tolerance_sq =
        config.endpoint_join_tolerance_meters * config.endpoint_join_tolerance_meters;

    let mut merges = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        if merges >= MAX_MERGES {
            diagnostics.warn(format!(
                "path connector hit the {MAX_MERGES} merge cap; output is partial"
            ));
            break;
        }

        // Ties break on (i, j, merge kind ordinal) because only a strictly better score
        // replaces the incumbent; output is reproducible for a given input order.
        let mut best: Option<(usize, usize, MergeKind, f64)> = None;
        for i in 0..slots.len() {
            let Some(p1) = slots[i].as_ref() else { continue };
            for j in (i + 1)..slots.len() {
                let Some(p2) = slots[j].as_ref() else { continue };
                if !compatible(p1, p2) {
                    continue;
                }
                for kind in MergeKind::ALL {
                    if let Some(score) = score_candidate(p1, p2, kind, valence, tolerance_sq) {
                        if best.map_or(true, |(_, _, _, s)| score > s) {
                            best = Some((i, j, kind, score));
                        }
                    }
                }
            }
        }

        let Some((i, j, kind, _)) = best else { break };
        let merged = merge_paths(slots[i].as_ref().unwrap(), slots[j].as_ref().unwrap(), kind);
        slots[i] = Some(merged);
        slots[j] = None;
        merges += 1;
    }

    slots.into_iter().flatten().collect()
}

fn compatible(p1: &PathWithMetadata, p2: &PathWithMetadata) -> bool {
    if p1.points.len() < 2 || p2.points.len() < 2 {
        return false;
    }
    // Ring fragments belong to the roundabout pass, never to greedy joining
    if p1.is_roundabout() || p2.is_roundabout() {
        return false;
    }
    match (p1.highway_group(), p2.highway_group()) {
        (Some(a), Some(b)) => a == b,
        // Missing highway tags don't block a merge
        _ => true,
    }
}

fn score_candidate(
    p1: &PathWithMetadata,
    p2: &PathWithMetadata,
    kind: MergeKind,
    valence: &HashMap<NodeID, u32>,
    tolerance_sq: f64,
) -> Option<f64> {
    let (n1, n2) = kind.connecting_nodes(p1, p2);
    let e1 = kind.connection_point(p1);
    let e2 = kind.other_connection_point(p2);

    let shared_node = match (n1, n2) {
        (Some(a), Some(b)) if a == b => true,
        // Two distinct OSM nodes in the same place are topologically separate; proximity
        // only joins endpoints whose identity was lost to cropping
        (Some(_), Some(_)) => return None,
        _ => false,
    };
    if !shared_node && e1.dist_squared(e2) > tolerance_sq {
        return None;
    }

    let requires_reversal = matches!(kind, MergeKind::EndEnd | MergeKind::StartStart);
    if requires_reversal && p2.is_oneway() {
        return None;
    }

    let conn = e1;
    let dp1 = p1.direction_point(kind.p1_connects_at_end(), DIRECTION_WALK_METERS);
    let dp2 = p2.direction_point(kind.p2_connects_at_end(), DIRECTION_WALK_METERS);
    let dir_in = (conn - dp1).normalized()?;
    let dir_out = (dp2 - conn).normalized()?;
    let d = dir_in.dot(dir_out);
    if d.is_nan() {
        return None;
    }

    if shared_node {
        let node = n1.unwrap();
        let is_junction = valence.get(&node).copied().unwrap_or(0) >= JUNCTION_VALENCE;
        // At a junction only near-straight continuations may join
        if is_junction && d <= 0.0 {
            return None;
        }
    }

    let shared_route = p1
        .route_relations
        .iter()
        .any(|r| p2.route_relations.contains(r));

    let mut score = d;
    if shared_node {
        score += SHARED_NODE_BONUS;
    }
    if shared_route {
        score += SHARED_ROUTE_BONUS;
    }
    if requires_reversal {
        score -= REVERSAL_PENALTY;
    }
    Some(score)
}
