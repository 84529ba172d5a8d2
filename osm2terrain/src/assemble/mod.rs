use std::collections::{HashMap, HashSet};

use enumset::EnumSet;

use crate::geometry::{InterpolationMode, RoadSpline, Vec2};
use crate::osm::{NodeID, RelationID, WayID};
use crate::paths::{dedupe_points, PathWithMetadata};
use crate::roundabout::{self, ProcessedRoundaboutInfo};
use crate::types::{CancelFlag, SplineFlag, TerrainConfig};
use crate::{
    AnnotatedRoadSpline, CoordinateTransformer, Diagnostics, GeoCoordinate, GeometryKind,
    OsmQueryResult, SplineID,
};

mod connector;
mod route_relations;

pub use connector::connect_paths;
pub use route_relations::merge_route_relations;

/// The four ways two paths can share an endpoint. The first word names p1's end, the second
/// p2's. Part of the tie-break order, so the ordinals matter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MergeKind {
    EndStart,
    EndEnd,
    StartEnd,
    StartStart,
}

impl MergeKind {
    pub(crate) const ALL: [MergeKind; 4] = [
        MergeKind::EndStart,
        MergeKind::EndEnd,
        MergeKind::StartEnd,
        MergeKind::StartStart,
    ];

    pub(crate) fn p1_connects_at_end(self) -> bool {
        matches!(self, MergeKind::EndStart | MergeKind::EndEnd)
    }

    pub(crate) fn p2_connects_at_end(self) -> bool {
        matches!(self, MergeKind::EndEnd | MergeKind::StartEnd)
    }

    pub(crate) fn connection_point(self, p1: &PathWithMetadata) -> Vec2 {
        if self.p1_connects_at_end() {
            p1.last_point()
        } else {
            p1.first_point()
        }
    }

    pub(crate) fn other_connection_point(self, p2: &PathWithMetadata) -> Vec2 {
        if self.p2_connects_at_end() {
            p2.last_point()
        } else {
            p2.first_point()
        }
    }

    pub(crate) fn connecting_nodes(
        self,
        p1: &PathWithMetadata,
        p2: &PathWithMetadata,
    ) -> (Option<NodeID>, Option<NodeID>) {
        let n1 = if self.p1_connects_at_end() {
            p1.end_node
        } else {
            p1.start_node
        };
        let n2 = if self.p2_connects_at_end() {
            p2.end_node
        } else {
            p2.start_node
        };
        (n1, n2)
    }
}

/// Concatenate two paths across their shared endpoint, dropping the duplicated point. The
/// result keeps p1's tags, way id, and structure flags; the node ids at the new outer endpoints
/// come from whichever path contributed them.
pub(crate) fn merge_paths(
    p1: &PathWithMetadata,
    p2: &PathWithMetadata,
    kind: MergeKind,
) -> PathWithMetadata {
    let mut points;
    let (start_node, end_node);
    match kind {
        MergeKind::EndStart => {
            points = p1.points.clone();
            points.extend_from_slice(&p2.points[1..]);
            start_node = p1.start_node;
            end_node = p2.end_node;
        }
        MergeKind::EndEnd => {
            points = p1.points.clone();
            points.extend(p2.points[..p2.points.len() - 1].iter().rev().copied());
            start_node = p1.start_node;
            end_node = p2.start_node;
        }
        MergeKind::StartEnd => {
            points = p2.points.clone();
            points.extend_from_slice(&p1.points[1..]);
            start_node = p2.start_node;
            end_node = p1.end_node;
        }
        MergeKind::StartStart => {
            points = p2.points.iter().rev().copied().collect();
            points.extend_from_slice(&p1.points[1..]);
            start_node = p2.end_node;
            end_node = p1.end_node;
        }
    }

    let mut route_relations = p1.route_relations.clone();
    for r in &p2.route_relations {
        if !route_relations.contains(r) {
            route_relations.push(*r);
        }
    }

    PathWithMetadata {
        points,
        start_node,
        end_node,
        way_id: p1.way_id,
        tags: p1.tags.clone(),
        is_bridge: p1.is_bridge,
        is_tunnel: p1.is_tunnel,
        layer: p1.layer,
        route_relations,
    }
}

/// Everything the line-to-spline conversion produced for one material.
pub struct AssemblyOutput {
    /// Ring splines first, then regular roads.
    pub splines: Vec<AnnotatedRoadSpline>,
    pub roundabouts: Vec<ProcessedRoundaboutInfo>,
    /// The untouched input paths in meters, for the debug image.
    pub original_paths: Vec<Vec<Vec2>>,
    /// Pieces the roundabout trimmer removed, in meters.
    pub trimmed_segments: Vec<Vec<Vec2>>,
}

/// Convert one material's LineString features into road splines: project and clip everything,
/// resolve roundabouts, pre-merge along route relations, then greedily join what's left.
#[allow(clippy::too_many_arguments)]
pub fn build_road_splines(
    query: &mut OsmQueryResult,
    feature_indices: &[usize],
    transformer: &CoordinateTransformer,
    config: &TerrainConfig,
    mode: InterpolationMode,
    next_spline_id: &mut usize,
    diagnostics: &mut Diagnostics,
    cancel: &CancelFlag,
) -> AssemblyOutput {
    let material_ways: HashSet<WayID> = feature_indices
        .iter()
        .map(|&idx| query.features[idx].id)
        .collect();

    let mut output = AssemblyOutput {
        splines: Vec::new(),
        roundabouts: Vec::new(),
        original_paths: Vec::new(),
        trimmed_segments: Vec::new(),
    };
    let mut excluded: HashSet<WayID> = HashSet::new();

    if config.detect_roundabouts {
        // Detection runs over the full query, then restricts to rings touching this
        // material's ways; otherwise two materials sharing a ring would both emit it
        let mut detected = roundabout::detect_roundabouts(query, diagnostics);
        for rb in &mut detected {
            if !rb.way_ids.iter().any(|id| material_ways.contains(id)) {
                continue;
            }
            let trim = roundabout::trim_connecting_roads(query, rb, config, diagnostics);
            let stubs = roundabout::resolve_stubs(query, rb, diagnostics);
            excluded.extend(rb.way_ids.iter().copied());
            excluded.extend(trim.deleted_way_ids.iter().copied());
            excluded.extend(stubs.removed_way_ids.iter().copied());
            for segment in &trim.trimmed_segments {
                output
                    .trimmed_segments
                    .push(geo_polyline_to_meters(segment, transformer, config));
            }

            let id = SplineID(*next_spline_id);
            match roundabout::merge_roundabout(rb, transformer, config, id) {
                Ok((spline, info)) => {
                    *next_spline_id += 1;
                    output.splines.push(spline);
                    output.roundabouts.push(info);
                }
                Err(err) => {
                    diagnostics.warn(format!("skipping roundabout {}: {err}", rb.id));
                }
            }
        }
    }

    // Which route relations reference each way
    let mut relations_by_way: HashMap<WayID, Vec<RelationID>> = HashMap::new();
    for relation in &query.route_relations {
        for member in &relation.members {
            let ids = relations_by_way.entry(member.way).or_default();
            if !ids.contains(&relation.id) {
                ids.push(relation.id);
            }
        }
    }

    let mut paths: Vec<PathWithMetadata> = Vec::new();
    for &idx in feature_indices {
        let feature = &query.features[idx];
        if feature.kind != GeometryKind::LineString
            || feature.coordinates.len() < 2
            || feature.is_roundabout_way()
            || excluded.contains(&feature.id)
        {
            continue;
        }
        let relations = relations_by_way
            .get(&feature.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        paths.extend(PathWithMetadata::from_feature(
            feature,
            transformer,
            config,
            relations,
        ));
    }
    output.original_paths = paths.iter().map(|p| p.points.clone()).collect();

    let valence = query.node_valence();
    let paths = merge_route_relations(paths, &query.route_relations, diagnostics);
    let paths = connect_paths(paths, &valence, config, diagnostics, cancel);

    for mut path in paths {
        dedupe_points(&mut path.points, config.duplicate_point_tolerance_meters);
        if path.points.len() < 2 {
            continue;
        }
        if path.length() < config.min_path_length_meters {
            continue;
        }
        let spline = match RoadSpline::new(path.points.clone(), mode) {
            Ok(s) => s,
            Err(err) => {
                diagnostics.warn(format!("skipping {}: {err}", path.way_id));
                continue;
            }
        };
        let mut flags = EnumSet::new();
        if path.is_bridge {
            flags.insert(SplineFlag::Bridge);
        }
        if path.is_tunnel {
            flags.insert(SplineFlag::Tunnel);
        }
        let id = SplineID(*next_spline_id);
        *next_spline_id += 1;
        output.splines.push(AnnotatedRoadSpline::new(
            id,
            spline,
            flags,
            path.layer,
            Some(path.way_id),
        ));
    }

    output
}

fn geo_polyline_to_meters(
    coords: &[GeoCoordinate],
    transformer: &CoordinateTransformer,
    config: &TerrainConfig,
) -> Vec<Vec2> {
    coords
        .iter()
        .map(|c| {
            let (x, y) = transformer.to_terrain_pixel(*c);
            Vec2::new(x, y) * config.meters_per_pixel
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::NodeID;
    use crate::tags::Tags;
    use crate::{GeoBoundingBox, OsmFeature};

    fn transformer() -> CoordinateTransformer {
        CoordinateTransformer::linear(GeoBoundingBox::new(0.0, 0.0, 0.01, 0.01).unwrap(), 1000)
    }

    #[test]
    fn fragments_of_one_street_become_one_spline() {
        let mut tags = Tags::new();
        tags.insert("highway", "residential");
        let mut query = OsmQueryResult::default();
        query.features.push(OsmFeature::new_line(
            WayID(1),
            tags.clone(),
            vec![GeoCoordinate::new(0.001, 0.005), GeoCoordinate::new(0.005, 0.005)],
            vec![NodeID(1), NodeID(2)],
        ));
        query.features.push(OsmFeature::new_line(
            WayID(2),
            tags,
            vec![GeoCoordinate::new(0.005, 0.005), GeoCoordinate::new(0.009, 0.005)],
            vec![NodeID(2), NodeID(3)],
        ));

        let config = TerrainConfig::default_for(1000, 1.0);
        let mut diagnostics = Diagnostics::new();
        let mut next_id = 0;
        let out = build_road_splines(
            &mut query,
            &[0, 1],
            &transformer(),
            &config,
            InterpolationMode::LinearControlPoints,
            &mut next_id,
            &mut diagnostics,
            &CancelFlag::new(),
        );
        assert_eq!(out.splines.len(), 1);
        assert_eq!(out.original_paths.len(), 2);
        assert_eq!(next_id, 1);
    }

    #[test]
    fn merging_never_invents_points() {
        // Joining only removes the duplicated shared endpoint; every surviving point was in
        // some input way
        let mut tags = Tags::new();
        tags.insert("highway", "tertiary");
        let mut query = OsmQueryResult::default();
        let coords = [
            vec![(0.001, 0.002), (0.002, 0.003), (0.003, 0.003)],
            vec![(0.003, 0.003), (0.005, 0.004)],
            vec![(0.005, 0.004), (0.007, 0.004), (0.009, 0.005)],
        ];
        let nodes = [vec![1, 2, 3], vec![3, 4], vec![4, 5, 6]];
        for (i, (c, n)) in coords.iter().zip(&nodes).enumerate() {
            query.features.push(OsmFeature::new_line(
                WayID(i as i64 + 1),
                tags.clone(),
                c.iter().map(|(lon, lat)| GeoCoordinate::new(*lon, *lat)).collect(),
                n.iter().map(|id| crate::osm::NodeID(*id)).collect(),
            ));
        }

        let config = TerrainConfig::default_for(1000, 1.0);
        let mut diagnostics = Diagnostics::new();
        let mut next_id = 0;
        let out = build_road_splines(
            &mut query,
            &[0, 1, 2],
            &transformer(),
            &config,
            InterpolationMode::LinearControlPoints,
            &mut next_id,
            &mut diagnostics,
            &CancelFlag::new(),
        );
        assert_eq!(out.splines.len(), 1);
        // 3 + 2 + 3 input points, two shared endpoints deduplicated
        let merged = out.splines[0].spline.control_points();
        assert_eq!(merged.len(), 6);
        let inputs: Vec<Vec2> = out.original_paths.iter().flatten().copied().collect();
        for p in merged {
            assert!(
                inputs.iter().any(|q| q.dist_to(*p) < 1e-9),
                "{p} was never an input point"
            );
        }
    }

    #[test]
    fn short_scraps_are_dropped() {
        let mut tags = Tags::new();
        tags.insert("highway", "service");
        let mut query = OsmQueryResult::default();
        // Roughly 0.55 m long at this scale
        query.features.push(OsmFeature::new_line(
            WayID(1),
            tags,
            vec![
                GeoCoordinate::new(0.005, 0.005),
                GeoCoordinate::new(0.005005, 0.005),
            ],
            vec![NodeID(1), NodeID(2)],
        ));
        let config = TerrainConfig::default_for(1000, 1.0);
        let mut diagnostics = Diagnostics::new();
        let mut next_id = 0;
        let out = build_road_splines(
            &mut query,
            &[0],
            &transformer(),
            &config,
            InterpolationMode::LinearControlPoints,
            &mut next_id,
            &mut diagnostics,
            &CancelFlag::new(),
        );
        assert!(out.splines.is_empty());
    }
}
