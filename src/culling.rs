//! Sector selection: frustum and clip culling plus screen-coverage LOD
//!
//! For every model the sector tree is walked depth first in model space.
//! A visible sector whose quads would be small relative to the view height
//! at its distance is wanted in detail and ends the descent; its ancestors
//! are wanted in detail too. Other visible sectors fall back to their quads
//! and everything else is discarded.

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::camera::Camera;
use crate::core::error::Error;
use crate::core::types::{Mat4, Result, Vec3};
use crate::math::{passes_clipping, Frustum, Plane};
use crate::sector::{CadModel, LevelOfDetail, LoadingHints, SectorMetadata, WantedSector};

/// Below this a transform counts as singular
const MIN_DETERMINANT: f32 = 1e-12;

/// Everything the selector looks at in one tick
#[derive(Clone, Copy, Debug)]
pub struct CullingInput<'a> {
    pub camera: &'a Camera,
    /// World-space clipping planes; geometry behind a plane is clipped
    pub clipping_planes: &'a [Plane],
    /// Clip only what is behind every plane instead of any plane
    pub clip_intersection: bool,
    pub loading_hints: &'a LoadingHints,
    pub models: &'a [Arc<CadModel>],
}

/// Decides which sectors should be loaded and at what level of detail.
pub trait SectorCuller: Send + Sync {
    /// One entry per sector of every model, nearest first
    fn determine_wanted(&self, input: &CullingInput<'_>) -> Result<Vec<WantedSector>>;
}

/// Screen-coverage selector
#[derive(Clone, Copy, Debug, Default)]
pub struct ScreenCoverageCuller;

/// Model-space view of one model for a tick
struct ModelView<'a> {
    camera: &'a Camera,
    camera_position: Vec3,
    frustum: Frustum,
    clipping_planes: Vec<Plane>,
    clip_intersection: bool,
    max_quad_size: f32,
}

#[derive(Default)]
struct Selection {
    visible: Vec<Arc<SectorMetadata>>,
    detailed: HashSet<u32>,
}

impl ModelView<'_> {
    fn is_visible(&self, sector: &SectorMetadata) -> bool {
        self.frustum.intersects_aabb(&sector.bounds)
            && passes_clipping(&sector.bounds, &self.clipping_planes, self.clip_intersection)
    }

    /// Quads smaller than this on screen are not good enough
    fn largest_allowed_quad_size(&self, sector: &SectorMetadata) -> f32 {
        let distance = sector.bounds.distance_to_point(self.camera_position);
        self.max_quad_size * self.camera.screen_height_at(distance)
    }

    fn select(&self, sector: &Arc<SectorMetadata>, ancestors: &mut Vec<u32>, out: &mut Selection) {
        if !self.is_visible(sector) {
            return;
        }
        out.visible.push(Arc::clone(sector));

        if sector.faces_file.quad_size < self.largest_allowed_quad_size(sector) {
            out.detailed.insert(sector.id);
            out.detailed.extend(ancestors.iter().copied());
            return;
        }

        ancestors.push(sector.id);
        for child in &sector.children {
            self.select(child, ancestors, out);
        }
        ancestors.pop();
    }
}

fn checked_inverse(model: &CadModel) -> Result<Mat4> {
    let det = model.transform.determinant();
    if !det.is_finite() || det.abs() < MIN_DETERMINANT {
        return Err(Error::NonInvertibleTransform(model.identifier.clone()));
    }
    Ok(model.transform.inverse())
}

impl ScreenCoverageCuller {
    fn wanted_for_model(&self, input: &CullingInput<'_>, model: &Arc<CadModel>) -> Result<Vec<(f32, WantedSector)>> {
        let to_model = checked_inverse(model)?;
        let view = ModelView {
            camera: input.camera,
            camera_position: to_model.transform_point3(input.camera.position),
            frustum: Frustum::from_view_projection(&(input.camera.view_projection() * model.transform)),
            clipping_planes: input
                .clipping_planes
                .iter()
                .map(|p| p.in_local_space(&model.transform))
                .collect(),
            clip_intersection: input.clip_intersection,
            max_quad_size: model.loading_hints.as_ref().unwrap_or(input.loading_hints).max_quad_size,
        };

        let mut selection = Selection::default();
        view.select(&model.scene.root, &mut Vec::new(), &mut selection);

        let simple: HashSet<u32> = selection
            .visible
            .iter()
            .filter(|s| !selection.detailed.contains(&s.id) && s.has_simple_geometry())
            .map(|s| s.id)
            .collect();

        let wanted = model
            .scene
            .sectors()
            .into_iter()
            .map(|sector| {
                let level_of_detail = if selection.detailed.contains(&sector.id) {
                    LevelOfDetail::Detailed
                } else if simple.contains(&sector.id) {
                    LevelOfDetail::Simple
                } else {
                    LevelOfDetail::Discarded
                };
                let world_distance = sector
                    .bounds
                    .transformed(&model.transform)
                    .distance_to_point(input.camera.position);
                let wanted = WantedSector {
                    model_identifier: model.identifier.clone(),
                    metadata: sector,
                    level_of_detail,
                    model_transform: model.transform,
                    data_source: Arc::clone(&model.data_source),
                };
                (world_distance, wanted)
            })
            .collect();
        Ok(wanted)
    }
}

impl SectorCuller for ScreenCoverageCuller {
    fn determine_wanted(&self, input: &CullingInput<'_>) -> Result<Vec<WantedSector>> {
        let mut all = Vec::new();
        for model in input.models {
            all.extend(self.wanted_for_model(input, model)?);
        }
        all.sort_by(|a, b| a.0.total_cmp(&b.0));

        if log::log_enabled!(log::Level::Debug) {
            let count = |lod| all.iter().filter(|(_, w)| w.level_of_detail == lod).count();
            log::debug!(
                "Selected {} detailed, {} simple, {} discarded sectors across {} models",
                count(LevelOfDetail::Detailed),
                count(LevelOfDetail::Simple),
                count(LevelOfDetail::Discarded),
                input.models.len()
            );
        }
        Ok(all.into_iter().map(|(_, w)| w).collect())
    }
}
