use std::fmt;

use serde::{Deserialize, Serialize};

pub const HIGHWAY: &str = "highway";
pub const ONEWAY: &str = "oneway";
pub const JUNCTION: &str = "junction";
pub const LAYER: &str = "layer";
pub const BRIDGE: &str = "bridge";
pub const TUNNEL: &str = "tunnel";
pub const NAME: &str = "name";

/// Opaque and non-contiguous
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeID(pub i64);

impl fmt::Display for NodeID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Opaque and non-contiguous
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WayID(pub i64);

impl fmt::Display for WayID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "way {}", self.0)
    }
}

/// Opaque and non-contiguous
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationID(pub i64);

impl fmt::Display for RelationID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "relation {}", self.0)
    }
}

/// Ranks highway types for choosing a "main" road among several candidates. Higher wins.
pub fn highway_priority(highway: &str) -> i32 {
    match highway {
        "motorway" => 100,
        "motorway_link" => 95,
        "trunk" => 90,
        "trunk_link" => 85,
        "primary" => 80,
        "primary_link" => 75,
        "secondary" => 70,
        "secondary_link" => 65,
        "tertiary" => 60,
        "tertiary_link" => 55,
        "unclassified" => 50,
        "residential" => 48,
        "living_street" => 40,
        "service" => 35,
        "track" => 30,
        _ => 35,
    }
}

/// Equivalence classes of highway values that are allowed to join into one path. Links join
/// their parent class; track and path behave the same for joining purposes.
pub fn highway_group(highway: &str) -> &'static str {
    match highway {
        "motorway" | "motorway_link" => "motorway",
        "trunk" | "trunk_link" => "trunk",
        "primary" | "primary_link" => "primary",
        "secondary" | "secondary_link" => "secondary",
        "tertiary" | "tertiary_link" => "tertiary",
        "residential" => "residential",
        "unclassified" => "unclassified",
        "living_street" => "living_street",
        "service" => "service",
        "track" | "path" => "track",
        "footway" => "footway",
        "cycleway" => "cycleway",
        "bridleway" => "bridleway",
        "steps" => "steps",
        "pedestrian" => "pedestrian",
        _ => "other",
    }
}

/// Highway values that never act as the parent road when collapsing stubs.
pub fn is_minor_highway(highway: &str) -> bool {
    matches!(
        highway,
        "cycleway" | "footway" | "path" | "steps" | "bridleway" | "pedestrian"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_rank_major_over_minor() {
        assert!(highway_priority("motorway") > highway_priority("trunk"));
        assert!(highway_priority("trunk") > highway_priority("residential"));
        assert!(highway_priority("residential") > highway_priority("track"));
        // Unknown types rank like service roads
        assert_eq!(highway_priority("busway"), 35);
    }

    #[test]
    fn links_group_with_parent() {
        assert_eq!(highway_group("primary_link"), highway_group("primary"));
        assert_eq!(highway_group("path"), highway_group("track"));
        assert_ne!(highway_group("cycleway"), highway_group("footway"));
    }
}
