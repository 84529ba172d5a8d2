#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::collections::HashMap;
use std::fmt;

use enumset::EnumSet;
use serde::{Deserialize, Serialize};

pub use crate::coords::{
    CoordinateTransformer, GeoBoundingBox, GeoCoordinate, Geotransform, IdentityProjection,
    Projection,
};
pub use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
pub use crate::geometry::{InterpolationMode, RoadSpline, SplineSample, Vec2};
pub use crate::heightmap::Heightmap;
pub use crate::network::{Junction, UnifiedCrossSection, UnifiedRoadNetwork};
pub use crate::osm::{NodeID, RelationID, WayID};
pub use crate::pipeline::{MaterialSpec, Pipeline, PipelineOutput, Stage};
pub use crate::raster::Mask;
pub use crate::render::RgbaImage;
pub use crate::roundabout::{OsmRoundabout, RoundaboutConnection};
pub use crate::structures::{OsmStructure, StructureElevationProfile, StructureInfo};
pub use crate::tags::Tags;
pub use crate::types::{
    CancelFlag, ConnectionDirection, CurveKind, JunctionKind, SplineFlag, TerrainConfig,
};

pub mod assemble;
mod clip;
mod coords;
mod diagnostics;
mod geometry;
mod heightmap;
pub mod io;
mod network;
pub mod osm;
mod paths;
mod pipeline;
pub mod raster;
mod render;
pub mod roundabout;
pub mod structures;
mod tags;
mod types;

pub use crate::paths::PathWithMetadata;

/// What shape an OSM feature's geometry takes after parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
}

/// One parsed OSM element. Coordinates are WGS84; `node_ids` runs parallel to `coordinates` but
/// may be shorter when the parser cropped the way. Mutated only while roundabout trimming and
/// stub resolution run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OsmFeature {
    pub id: WayID,
    /// The main tag category this feature was queried for, e.g. "highway".
    pub category: String,
    pub tags: Tags,
    pub kind: GeometryKind,
    /// Outer ring for polygons.
    pub coordinates: Vec<GeoCoordinate>,
    pub node_ids: Vec<NodeID>,
    /// Holes of a polygon.
    pub inner_rings: Vec<Vec<GeoCoordinate>>,
    /// Additional outer rings of a multipolygon.
    pub outer_parts: Vec<Vec<GeoCoordinate>>,
}

impl OsmFeature {
    pub fn new_line(id: WayID, tags: Tags, coordinates: Vec<GeoCoordinate>, node_ids: Vec<NodeID>) -> Self {
        OsmFeature {
            id,
            category: osm::HIGHWAY.to_string(),
            tags,
            kind: GeometryKind::LineString,
            coordinates,
            node_ids,
            inner_rings: Vec::new(),
            outer_parts: Vec::new(),
        }
    }

    pub fn highway(&self) -> Option<&String> {
        self.tags.get(osm::HIGHWAY)
    }

    pub fn is_roundabout_way(&self) -> bool {
        self.tags.is(osm::JUNCTION, "roundabout")
    }

    /// True for oneway=yes/true/1/-1.
    pub fn is_oneway(&self) -> bool {
        self.tags.is_any(osm::ONEWAY, vec!["yes", "true", "1", "-1"])
    }

    /// oneway=-1 draws against the direction of travel.
    pub fn is_reverse_oneway(&self) -> bool {
        self.tags.is(osm::ONEWAY, "-1")
    }

    /// `layer` tag as a signed integer; fractional values round toward zero, junk is 0.
    pub fn layer(&self) -> i32 {
        parse_layer(&self.tags)
    }
}

pub(crate) fn parse_layer(tags: &Tags) -> i32 {
    if let Some(layer) = tags.get(osm::LAYER) {
        match layer.parse::<f64>() {
            Ok(l) => l as i32,
            Err(_) => {
                warn!("Weird layer={layer} tag");
                0
            }
        }
    } else {
        0
    }
}

/// Role of one member inside a route relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Forward,
    Backward,
    None,
}

impl MemberRole {
    pub fn parse(role: &str) -> MemberRole {
        match role {
            "forward" => MemberRole::Forward,
            "backward" => MemberRole::Backward,
            _ => MemberRole::None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RouteMember {
    pub way: WayID,
    pub role: MemberRole,
}

/// An OSM `type=route` relation: ordered ways that belong to one signed route.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteRelation {
    pub id: RelationID,
    pub members: Vec<RouteMember>,
}

/// Everything the pipeline consumes for one request: parsed features plus the parallel route
/// relation and structure collections. Owned by the pipeline for the duration of a run; only
/// roundabout trimming and stub resolution mutate it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OsmQueryResult {
    pub features: Vec<OsmFeature>,
    pub route_relations: Vec<RouteRelation>,
    pub structures: Vec<OsmStructure>,
}

impl OsmQueryResult {
    /// How many ways each OSM node participates in. Endpoint nodes with valence >= 3 are
    /// junctions the path connector must not merge across.
    pub fn node_valence(&self) -> HashMap<NodeID, u32> {
        let mut valence: HashMap<NodeID, u32> = HashMap::new();
        for feature in &self.features {
            if feature.kind != GeometryKind::LineString {
                continue;
            }
            // A way visiting the same node twice (loops) still counts once
            let mut seen = std::collections::HashSet::new();
            for node in &feature.node_ids {
                if seen.insert(*node) {
                    *valence.entry(*node).or_insert(0) += 1;
                }
            }
        }
        valence
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SplineID(pub usize);

impl fmt::Display for SplineID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "spline #{}", self.0)
    }
}

/// A road spline with everything the terrain generator wants to know about it. The geometry is
/// immutable once built; the structure annotations arrive later from the bridge/tunnel matcher.
#[derive(Debug)]
pub struct AnnotatedRoadSpline {
    pub id: SplineID,
    pub spline: RoadSpline,
    pub length: f64,
    pub start: Vec2,
    pub end: Vec2,
    pub flags: EnumSet<SplineFlag>,
    /// OSM layer tag; bridges above ground are positive, tunnels negative.
    pub layer: i32,
    /// The way this spline started from. Merged paths keep the first constituent's id.
    pub way_id: Option<WayID>,
    pub structure: Option<StructureInfo>,
    pub elevation_profile: Option<StructureElevationProfile>,
}

impl AnnotatedRoadSpline {
    pub fn new(id: SplineID, spline: RoadSpline, flags: EnumSet<SplineFlag>, layer: i32, way_id: Option<WayID>) -> Self {
        let length = spline.total_length();
        let start = spline.first_point();
        let end = spline.last_point();
        AnnotatedRoadSpline {
            id,
            spline,
            length,
            start,
            end,
            flags,
            layer,
            way_id,
            structure: None,
            elevation_profile: None,
        }
    }

    pub fn is_bridge(&self) -> bool {
        self.flags.contains(SplineFlag::Bridge)
    }

    pub fn is_tunnel(&self) -> bool {
        self.flags.contains(SplineFlag::Tunnel)
    }

    pub fn is_structure(&self) -> bool {
        self.is_bridge() || self.is_tunnel()
    }

    pub fn is_roundabout(&self) -> bool {
        self.flags.contains(SplineFlag::Roundabout)
    }
}
