//! Manager facade
//!
//! Glue between the host renderer and the streaming pipeline. The manager
//! registers models, forwards view changes to the scheduler and swaps the
//! groups it receives into the renderer, one attached group per sector.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::core::camera::Camera;
use crate::core::config::StreamingConfig;
use crate::core::error::Error;
use crate::core::types::{Mat4, Result};
use crate::culling::{ScreenCoverageCuller, SectorCuller};
use crate::math::Plane;
use crate::repository::{CachedRepository, ModelDataSource, SectorGroup, SCENE_FILE_NAME};
use crate::scheduler::{LoadingState, UpdateScheduler};
use crate::sector::{CadModel, ConsumedSector, LoadingHints, SectorScene};

/// Scene-graph side of the renderer.
pub trait RendererHandle {
    /// Show `group` for a sector
    fn attach(&mut self, model: &str, sector_id: u32, group: &Arc<SectorGroup>);

    /// Stop showing `group` for a sector
    fn detach(&mut self, model: &str, sector_id: u32, group: &Arc<SectorGroup>);

    /// Release GPU resources of a group no sector shows any more
    fn dispose(&mut self, group: &Arc<SectorGroup>);
}

struct ModelEntry {
    model: Arc<CadModel>,
    attached: HashMap<u32, Arc<SectorGroup>>,
}

/// Owns the pipeline for a set of models and feeds a renderer.
///
/// Must be created inside a tokio runtime.
pub struct CadManager<R: RendererHandle> {
    scheduler: UpdateScheduler,
    consumed: mpsc::UnboundedReceiver<ConsumedSector>,
    repository: CachedRepository,
    renderer: R,
    models: HashMap<String, ModelEntry>,
    needs_redraw: bool,
}

impl<R: RendererHandle> CadManager<R> {
    pub fn new(config: StreamingConfig, renderer: R) -> Self {
        Self::with_culler(config, Arc::new(ScreenCoverageCuller), renderer)
    }

    pub fn with_culler(config: StreamingConfig, culler: Arc<dyn SectorCuller>, renderer: R) -> Self {
        let repository = CachedRepository::new(config.repository.clone(), config.parser.worker_count);
        let (scheduler, consumed) =
            UpdateScheduler::spawn(config.scheduler.clone(), config.loading_hints, culler, repository.clone());

        log::info!(
            "CAD manager started ({} parser workers, {} concurrent loads)",
            config.parser.worker_count, config.repository.max_concurrent_operations
        );

        Self {
            scheduler,
            consumed,
            repository,
            renderer,
            models: HashMap::new(),
            needs_redraw: false,
        }
    }

    /// Load the scene descriptor of a model and start streaming it.
    ///
    /// A model registered under the same identifier is replaced.
    pub async fn add_model(
        &mut self,
        identifier: impl Into<String>,
        data_source: Arc<dyn ModelDataSource>,
        transform: Mat4,
    ) -> Result<Arc<CadModel>> {
        let identifier = identifier.into();
        let bytes = data_source.fetch_json(SCENE_FILE_NAME).await?;
        let scene = SectorScene::from_json(&bytes)?;

        if self.models.contains_key(&identifier) {
            self.remove_model(&identifier)?;
        }

        let model = Arc::new(CadModel::new(identifier.clone(), scene, data_source).with_transform(transform));
        self.scheduler.add_model(Arc::clone(&model))?;
        self.models.insert(
            identifier,
            ModelEntry { model: Arc::clone(&model), attached: HashMap::new() },
        );
        Ok(model)
    }

    /// Detach every group of a model and stop streaming it.
    pub fn remove_model(&mut self, identifier: &str) -> Result<()> {
        let entry = self
            .models
            .remove(identifier)
            .ok_or_else(|| Error::UnknownModel(identifier.to_string()))?;

        for (sector_id, group) in entry.attached {
            self.renderer.detach(identifier, sector_id, &group);
            if group.release() == 0 {
                self.renderer.dispose(&group);
            }
        }
        self.needs_redraw = true;
        self.scheduler.remove_model(identifier)
    }

    pub fn model(&self, identifier: &str) -> Option<&Arc<CadModel>> {
        self.models.get(identifier).map(|e| &e.model)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Group currently shown for a sector
    pub fn attached_group(&self, model: &str, sector_id: u32) -> Option<&Arc<SectorGroup>> {
        self.models.get(model)?.attached.get(&sector_id)
    }

    pub fn attached_count(&self, model: &str) -> usize {
        self.models.get(model).map_or(0, |e| e.attached.len())
    }

    pub fn set_camera(&self, camera: Camera) -> Result<()> {
        self.scheduler.set_camera(camera)
    }

    pub fn set_clipping_planes(&self, planes: Vec<Plane>, intersection: bool) -> Result<()> {
        self.scheduler.set_clipping_planes(planes, intersection)
    }

    pub fn set_loading_hints(&self, hints: LoadingHints) -> Result<()> {
        self.scheduler.set_loading_hints(hints)
    }

    /// Override (or with `None`, reset) the loading hints of one model
    pub fn set_model_loading_hints(&self, identifier: &str, hints: Option<LoadingHints>) -> Result<()> {
        if !self.models.contains_key(identifier) {
            return Err(Error::UnknownModel(identifier.to_string()));
        }
        self.scheduler.set_model_loading_hints(identifier, hints)
    }

    /// Apply a resolved sector: release what the sector showed before and
    /// attach the new group, if any.
    pub fn consume_sector(&mut self, consumed: ConsumedSector) {
        let sector_id = consumed.sector_id();
        let Some(entry) = self.models.get_mut(&consumed.model_identifier) else {
            log::trace!("Ignoring sector {} of removed model '{}'", sector_id, consumed.model_identifier);
            return;
        };

        let previous = entry.attached.remove(&sector_id);
        if let (Some(old), Some(new)) = (&previous, &consumed.group) {
            if Arc::ptr_eq(old, new) {
                entry.attached.insert(sector_id, Arc::clone(old));
                return;
            }
        }

        if let Some(old) = previous {
            self.renderer.detach(&consumed.model_identifier, sector_id, &old);
            if old.release() == 0 {
                log::trace!("Disposing group '{}'", old.name());
                self.renderer.dispose(&old);
            }
        }

        if let Some(group) = consumed.group {
            group.retain();
            self.renderer.attach(&consumed.model_identifier, sector_id, &group);
            entry.attached.insert(sector_id, group);
        }
        self.needs_redraw = true;
    }

    /// Apply every sector resolved so far without waiting.
    /// Returns the number applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(consumed) = self.consumed.try_recv() {
            self.consume_sector(consumed);
            applied += 1;
        }
        applied
    }

    /// Wait for the next resolved sector, then apply everything available.
    pub async fn wait_for_update(&mut self) -> Result<usize> {
        let consumed = self
            .consumed
            .recv()
            .await
            .ok_or_else(|| Error::Pipeline("update scheduler has stopped".into()))?;
        self.consume_sector(consumed);
        Ok(1 + self.poll())
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    /// Call once per rendered frame
    pub fn reset_redraw(&mut self) {
        self.needs_redraw = false;
    }

    pub fn loading_state(&self) -> watch::Receiver<LoadingState> {
        self.scheduler.loading_state()
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.scheduler.clear_cache()
    }

    pub fn repository(&self) -> &CachedRepository {
        &self.repository
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}
