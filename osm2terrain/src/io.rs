use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde_json::{json, Map};

use crate::roundabout::ProcessedRoundaboutInfo;
use crate::AnnotatedRoadSpline;

/// Dump the spline set as GeoJSON for eyeballing in any viewer. Coordinates are terrain meters,
/// not WGS84; this is a debugging artifact, the same way the street-network exporters dump
/// their working geometry.
pub fn splines_to_geojson(
    splines: &[AnnotatedRoadSpline],
    roundabouts: &[ProcessedRoundaboutInfo],
) -> GeoJson {
    let mut features = Vec::new();

    for spline in splines {
        let coords: Vec<Vec<f64>> = spline
            .spline
            .control_points()
            .iter()
            .map(|p| vec![p.x, p.y])
            .collect();
        let mut properties = Map::new();
        properties.insert("id".to_string(), json!(spline.id.0));
        properties.insert("length_m".to_string(), json!(spline.length));
        properties.insert("bridge".to_string(), json!(spline.is_bridge()));
        properties.insert("tunnel".to_string(), json!(spline.is_tunnel()));
        properties.insert("roundabout".to_string(), json!(spline.is_roundabout()));
        properties.insert("layer".to_string(), json!(spline.layer));
        if let Some(way) = spline.way_id {
            properties.insert("osm_way".to_string(), json!(way.0));
        }
        if let Some(profile) = &spline.elevation_profile {
            properties.insert("curve".to_string(), json!(format!("{:?}", profile.curve)));
            properties.insert("profile_valid".to_string(), json!(profile.valid));
        }
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::LineString(coords))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    for rb in roundabouts {
        for conn in &rb.connections {
            let mut properties = Map::new();
            properties.insert("connection_of".to_string(), json!(rb.spline_id.0));
            properties.insert("osm_way".to_string(), json!(conn.way_id.0));
            properties.insert("angle_deg".to_string(), json!(conn.angle_degrees));
            properties.insert(
                "distance_along".to_string(),
                json!(conn.distance_along_spline),
            );
            features.push(Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![conn.point.x, conn.point.y]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }
    }

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{InterpolationMode, RoadSpline, Vec2};
    use crate::SplineID;
    use enumset::EnumSet;

    #[test]
    fn export_is_a_feature_collection() {
        let spline = RoadSpline::new(
            vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)],
            InterpolationMode::LinearControlPoints,
        )
        .unwrap();
        let annotated = AnnotatedRoadSpline::new(SplineID(3), spline, EnumSet::new(), 0, None);
        let geojson = splines_to_geojson(&[annotated], &[]);
        let text = geojson.to_string();
        assert!(text.contains("FeatureCollection"));
        assert!(text.contains("LineString"));
        assert!(text.contains("\"length_m\":10.0"));
    }
}
