use crate::clip::clip_polyline;
use crate::geometry::Vec2;
use crate::osm::{self, NodeID, RelationID, WayID};
use crate::tags::Tags;
use crate::{parse_layer, CoordinateTransformer, OsmFeature, TerrainConfig};

/// A road fragment on its way to becoming a spline: points in terrain meters, the OSM node
/// identity of each end (lost when the boundary clipped it), and a snapshot of the way's tags.
/// Only the point list and node ids change after construction, and only through merging.
#[derive(Clone, Debug)]
pub struct PathWithMetadata {
    pub points: Vec<Vec2>,
    pub start_node: Option<NodeID>,
    pub end_node: Option<NodeID>,
    pub way_id: WayID,
    pub tags: Tags,
    pub is_bridge: bool,
    pub is_tunnel: bool,
    pub layer: i32,
    /// Route relations this way belongs to; two fragments of the same route merge more eagerly.
    pub route_relations: Vec<RelationID>,
}

impl PathWithMetadata {
    /// Transform one LineString feature into terrain meters: project, clip to the terrain
    /// square, scale, and drop consecutive duplicates. A way that leaves and re-enters the
    /// terrain yields several paths.
    pub fn from_feature(
        feature: &OsmFeature,
        transformer: &CoordinateTransformer,
        config: &TerrainConfig,
        route_relations: &[RelationID],
    ) -> Vec<PathWithMetadata> {
        let pixel_points: Vec<Vec2> = feature
            .coordinates
            .iter()
            .map(|c| {
                let (x, y) = transformer.to_terrain_pixel(*c);
                Vec2::new(x, y)
            })
            .collect();

        let mut out = Vec::new();
        for run in clip_polyline(&pixel_points, config.terrain_size as f64) {
            let mut points: Vec<Vec2> = run
                .points
                .iter()
                .map(|p| *p * config.meters_per_pixel)
                .collect();
            dedupe_points(&mut points, config.duplicate_point_tolerance_meters);
            if points.len() < 2 {
                continue;
            }
            let node_at = |idx: Option<usize>| idx.and_then(|i| feature.node_ids.get(i).copied());
            out.push(PathWithMetadata {
                points,
                start_node: node_at(run.first_original),
                end_node: node_at(run.last_original),
                way_id: feature.id,
                tags: feature.tags.clone(),
                is_bridge: feature.tags.contains_key(osm::BRIDGE)
                    && !feature.tags.is(osm::BRIDGE, "no"),
                is_tunnel: feature.tags.contains_key(osm::TUNNEL)
                    && !feature.tags.is(osm::TUNNEL, "no"),
                layer: parse_layer(&feature.tags),
                route_relations: route_relations.to_vec(),
            });
        }
        out
    }

    pub fn first_point(&self) -> Vec2 {
        self.points[0]
    }

    pub fn last_point(&self) -> Vec2 {
        *self.points.last().unwrap()
    }

    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].dist_to(w[1]))
            .sum()
    }

    pub fn is_oneway(&self) -> bool {
        self.tags.is_any(osm::ONEWAY, vec!["yes", "true", "1", "-1"])
    }

    pub fn is_roundabout(&self) -> bool {
        self.tags.is(osm::JUNCTION, "roundabout")
    }

    pub fn highway_group(&self) -> Option<&'static str> {
        self.tags.get(osm::HIGHWAY).map(|hw| osm::highway_group(hw))
    }

    /// The point roughly `walk` meters along the path from the given end, for estimating the
    /// direction a path approaches its endpoint with. Falls back to the far end of short paths.
    pub fn direction_point(&self, from_end: bool, walk: f64) -> Vec2 {
        let mut remaining = walk;
        if from_end {
            for w in self.points.windows(2).rev() {
                let seg = w[1].dist_to(w[0]);
                if seg >= remaining {
                    return w[1].lerp(w[0], remaining / seg);
                }
                remaining -= seg;
            }
            self.first_point()
        } else {
            for w in self.points.windows(2) {
                let seg = w[0].dist_to(w[1]);
                if seg >= remaining {
                    return w[0].lerp(w[1], remaining / seg);
                }
                remaining -= seg;
            }
            self.last_point()
        }
    }
}

/// Collapse consecutive points closer than `tolerance`. The survivor is the first of each run.
pub fn dedupe_points(points: &mut Vec<Vec2>, tolerance: f64) {
    let mut write = 0;
    for read in 0..points.len() {
        if write == 0 || points[write - 1].dist_to(points[read]) >= tolerance {
            points[write] = points[read];
            write += 1;
        }
    }
    points.truncate(write);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoBoundingBox, GeoCoordinate};

    fn transformer() -> CoordinateTransformer {
        CoordinateTransformer::linear(
            GeoBoundingBox::new(0.0, 0.0, 0.01, 0.01).unwrap(),
            1000,
        )
    }

    #[test]
    fn dedupe_keeps_first_of_run() {
        let mut pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 0.005),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ];
        dedupe_points(&mut pts, 0.01);
        assert_eq!(
            pts,
            vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)]
        );
    }

    #[test]
    fn feature_keeps_node_identity_when_inside() {
        let feature = OsmFeature::new_line(
            WayID(1),
            vec![("highway", "residential")].into_iter().collect(),
            vec![GeoCoordinate::new(0.001, 0.001), GeoCoordinate::new(0.002, 0.002)],
            vec![NodeID(10), NodeID(11)],
        );
        let config = TerrainConfig::default_for(1000, 1.0);
        let paths = PathWithMetadata::from_feature(&feature, &transformer(), &config, &[]);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].start_node, Some(NodeID(10)));
        assert_eq!(paths[0].end_node, Some(NodeID(11)));
    }

    #[test]
    fn cropped_endpoint_loses_node() {
        let feature = OsmFeature::new_line(
            WayID(1),
            vec![("highway", "residential")].into_iter().collect(),
            // Starts outside the bounding box to the west
            vec![GeoCoordinate::new(-0.002, 0.005), GeoCoordinate::new(0.005, 0.005)],
            vec![NodeID(10), NodeID(11)],
        );
        let config = TerrainConfig::default_for(1000, 1.0);
        let paths = PathWithMetadata::from_feature(&feature, &transformer(), &config, &[]);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].start_node, None);
        assert_eq!(paths[0].end_node, Some(NodeID(11)));
        assert!(paths[0].first_point().x.abs() < 1e-9);
    }

    #[test]
    fn direction_point_walks_along() {
        let path = PathWithMetadata {
            points: vec![Vec2::new(0.0, 0.0), Vec2::new(100.0, 0.0)],
            start_node: None,
            end_node: None,
            way_id: WayID(1),
            tags: Tags::new(),
            is_bridge: false,
            is_tunnel: false,
            layer: 0,
            route_relations: Vec::new(),
        };
        assert_eq!(path.direction_point(false, 30.0), Vec2::new(30.0, 0.0));
        assert_eq!(path.direction_point(true, 30.0), Vec2::new(70.0, 0.0));
        // Shorter than the walk: the far end
        assert_eq!(path.direction_point(false, 500.0), Vec2::new(100.0, 0.0));
    }
}
