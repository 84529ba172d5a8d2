use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::assemble;
use crate::geometry::{InterpolationMode, Vec2};
use crate::heightmap::Heightmap;
use crate::network::{build_network, UnifiedRoadNetwork};
use crate::raster::{self, Mask};
use crate::render::{render_debug, RgbaImage};
use crate::roundabout::ProcessedRoundaboutInfo;
use crate::structures::match_structures;
use crate::types::{CancelFlag, TerrainConfig};
use crate::{
    AnnotatedRoadSpline, CoordinateTransformer, Diagnostics, GeoCoordinate, GeometryKind,
    OsmFeature, OsmQueryResult,
};

/// Selects which features feed one terrain layer. Every material gets its own mask; the road
/// splines come from the material's LineString features, the polygon fills from its polygons.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterialSpec {
    pub name: String,
    /// Tag key a feature must carry.
    pub tag_key: String,
    /// Accepted values; empty accepts any value of the key.
    pub tag_values: Vec<String>,
    /// Paint the raw OSM polylines instead of the assembled splines. A fallback for layers
    /// where joining fragments would do more harm than good.
    pub use_original_geometry: bool,
}

impl MaterialSpec {
    /// Every highway, the usual single-material setup.
    pub fn roads() -> MaterialSpec {
        MaterialSpec {
            name: "road".to_string(),
            tag_key: crate::osm::HIGHWAY.to_string(),
            tag_values: Vec::new(),
            use_original_geometry: false,
        }
    }

    pub fn matches(&self, feature: &OsmFeature) -> bool {
        match feature.tags.get(&self.tag_key) {
            Some(v) => self.tag_values.is_empty() || self.tag_values.iter().any(|x| x == v),
            None => false,
        }
    }
}

/// The whole conversion, configured once and run against a query result. The caller may hand
/// the run to a background worker; within the run everything executes sequentially in
/// dependency order.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub config: TerrainConfig,
    pub materials: Vec<MaterialSpec>,
    pub interpolation: InterpolationMode,
    pub emit_debug_image: bool,
}

impl Pipeline {
    pub fn new(config: TerrainConfig) -> Pipeline {
        Pipeline {
            config,
            materials: vec![MaterialSpec::roads()],
            interpolation: InterpolationMode::SmoothInterpolated,
            emit_debug_image: false,
        }
    }

    /// Run every stage. `Err` only for structurally invalid input; per-feature geometry
    /// problems come back as diagnostics on a successful result.
    pub fn run(
        &self,
        query: OsmQueryResult,
        transformer: &CoordinateTransformer,
        heightmap: Option<&Heightmap>,
        cancel: &CancelFlag,
    ) -> Result<PipelineOutput> {
        if self.config.meters_per_pixel <= 0.0 {
            bail!("meters_per_pixel must be positive");
        }
        if self.config.terrain_size == 0 {
            bail!("terrain_size must be positive");
        }
        if self.materials.is_empty() {
            bail!("at least one material is required");
        }

        let feature_count = query.features.len();
        let mut state = PipelineState {
            pipeline: self,
            query,
            transformer,
            heightmap,
            cancel,
            diagnostics: Diagnostics::new(),
            splines: Vec::new(),
            roundabouts: Vec::new(),
            material_splines: Vec::new(),
            material_paths: Vec::new(),
            original_paths: Vec::new(),
            trimmed_segments: Vec::new(),
            masks: Vec::new(),
            network: UnifiedRoadNetwork::default(),
            debug_image: None,
            next_spline_id: 0,
        };

        for stage in Stage::standard() {
            if cancel.is_cancelled() {
                state
                    .diagnostics
                    .warn(format!("cancelled before {}", stage.name()));
                break;
            }
            info!("pipeline stage: {}", stage.name());
            stage.apply(&mut state);
        }

        let spline_count = state.splines.len();
        let (success, reason) = if spline_count == 0 && feature_count > 0 {
            (
                false,
                Some(format!(
                    "no road splines could be built from {feature_count} features"
                )),
            )
        } else {
            (true, None)
        };

        Ok(PipelineOutput {
            splines: state.splines,
            roundabouts: state.roundabouts,
            masks: state.masks,
            network: state.network,
            debug_image: state.debug_image,
            diagnostics: state.diagnostics,
            success,
            reason,
            feature_count,
            spline_count,
        })
    }
}

pub struct PipelineOutput {
    pub splines: Vec<AnnotatedRoadSpline>,
    pub roundabouts: Vec<ProcessedRoundaboutInfo>,
    /// One 8-bit mask per material, in material order.
    pub masks: Vec<(String, Mask)>,
    pub network: UnifiedRoadNetwork,
    pub debug_image: Option<RgbaImage>,
    pub diagnostics: Diagnostics,
    pub success: bool,
    pub reason: Option<String>,
    pub feature_count: usize,
    pub spline_count: usize,
}

/// One step of the pipeline. They always run in `standard()` order; cancellation is checked
/// between steps.
pub enum Stage {
    ConvertLines,
    MatchStructures,
    RasterizeMasks,
    BuildNetwork,
    RenderDebug,
}

impl Stage {
    pub fn standard() -> Vec<Stage> {
        vec![
            Stage::ConvertLines,
            Stage::MatchStructures,
            Stage::RasterizeMasks,
            Stage::BuildNetwork,
            Stage::RenderDebug,
        ]
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::ConvertLines => "convert lines to splines",
            Stage::MatchStructures => "match bridges and tunnels",
            Stage::RasterizeMasks => "rasterize layer masks",
            Stage::BuildNetwork => "build unified network",
            Stage::RenderDebug => "render debug image",
        }
    }

    fn apply(&self, state: &mut PipelineState) {
        match self {
            Stage::ConvertLines => convert_lines(state),
            Stage::MatchStructures => {
                let pipeline = state.pipeline;
                match_structures(
                    &mut state.splines,
                    &state.query.structures,
                    state.transformer,
                    state.heightmap,
                    &pipeline.config,
                    &mut state.diagnostics,
                    state.cancel,
                );
            }
            Stage::RasterizeMasks => rasterize_masks(state),
            Stage::BuildNetwork => {
                state.network = build_network(
                    &state.splines,
                    state.heightmap,
                    &state.pipeline.config,
                );
            }
            Stage::RenderDebug => {
                if state.pipeline.emit_debug_image {
                    state.debug_image = Some(render_debug(
                        state.pipeline.config.terrain_size,
                        state.pipeline.config.meters_per_pixel,
                        &state.original_paths,
                        &state.trimmed_segments,
                        &state.splines,
                        &state.roundabouts,
                    ));
                }
            }
        }
    }
}

struct PipelineState<'a> {
    pipeline: &'a Pipeline,
    query: OsmQueryResult,
    transformer: &'a CoordinateTransformer,
    heightmap: Option<&'a Heightmap>,
    cancel: &'a CancelFlag,
    diagnostics: Diagnostics,
    splines: Vec<AnnotatedRoadSpline>,
    roundabouts: Vec<ProcessedRoundaboutInfo>,
    /// Per material, indices into `splines`.
    material_splines: Vec<(String, Vec<usize>)>,
    /// Per material, indices into `original_paths`.
    material_paths: Vec<Vec<usize>>,
    original_paths: Vec<Vec<Vec2>>,
    trimmed_segments: Vec<Vec<Vec2>>,
    masks: Vec<(String, Mask)>,
    network: UnifiedRoadNetwork,
    debug_image: Option<RgbaImage>,
    next_spline_id: usize,
}

fn convert_lines(state: &mut PipelineState) {
    let materials = state.pipeline.materials.clone();
    for material in &materials {
        let indices: Vec<usize> = state
            .query
            .features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.kind == GeometryKind::LineString && material.matches(f))
            .map(|(idx, _)| idx)
            .collect();

        let before = state.splines.len();
        let output = assemble::build_road_splines(
            &mut state.query,
            &indices,
            state.transformer,
            &state.pipeline.config,
            state.pipeline.interpolation,
            &mut state.next_spline_id,
            &mut state.diagnostics,
            state.cancel,
        );
        state.splines.extend(output.splines);
        state.roundabouts.extend(output.roundabouts);
        let paths_before = state.original_paths.len();
        state.original_paths.extend(output.original_paths);
        state.trimmed_segments.extend(output.trimmed_segments);
        state
            .material_paths
            .push((paths_before..state.original_paths.len()).collect());
        state
            .material_splines
            .push((material.name.clone(), (before..state.splines.len()).collect()));
        state.diagnostics.info(format!(
            "material {}: {} splines from {} features",
            material.name,
            state.splines.len() - before,
            indices.len()
        ));
    }
}

fn rasterize_masks(state: &mut PipelineState) {
    let config = &state.pipeline.config;
    let width = config.surface_width();
    for (material_idx, material) in state.pipeline.materials.iter().enumerate() {
        let mut mask = Mask::new(config.terrain_size);

        if material.use_original_geometry {
            for &path_idx in &state.material_paths[material_idx] {
                raster::fill_thick_polyline(
                    &mut mask,
                    &state.original_paths[path_idx],
                    width,
                    config.meters_per_pixel,
                );
            }
        } else {
            for &spline_idx in &state.material_splines[material_idx].1 {
                raster::fill_spline_band(
                    &mut mask,
                    &state.splines[spline_idx].spline,
                    width,
                    config.meters_per_pixel,
                );
            }
        }

        // Polygon features paint directly, holes subtracted by scanline
        for feature in &state.query.features {
            if feature.kind != GeometryKind::Polygon || !material.matches(feature) {
                continue;
            }
            let outer = geo_ring_to_image(&feature.coordinates, state.transformer);
            let inners: Vec<Vec<Vec2>> = feature
                .inner_rings
                .iter()
                .map(|ring| geo_ring_to_image(ring, state.transformer))
                .collect();
            raster::fill_polygon(&mut mask, &outer, &inners);
            for part in &feature.outer_parts {
                raster::fill_outer_part(&mut mask, &geo_ring_to_image(part, state.transformer));
            }
        }

        state.masks.push((material.name.clone(), mask));
    }
}

fn geo_ring_to_image(ring: &[GeoCoordinate], transformer: &CoordinateTransformer) -> Vec<Vec2> {
    ring.iter()
        .map(|c| {
            let (x, y) = transformer.to_image_pixel(*c);
            Vec2::new(x, y)
        })
        .collect()
}
