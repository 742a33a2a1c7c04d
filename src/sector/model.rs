//! A loaded model taking part in sector selection

use std::fmt;
use std::sync::Arc;

use crate::core::types::Mat4;
use crate::repository::ModelDataSource;
use super::lod::LoadingHints;
use super::scene::SectorScene;

/// Scene tree, placement and byte source of one model
#[derive(Clone)]
pub struct CadModel {
    pub identifier: String,
    pub scene: Arc<SectorScene>,
    /// Model to world
    pub transform: Mat4,
    pub data_source: Arc<dyn ModelDataSource>,
    /// Overrides the scheduler's hints for this model
    pub loading_hints: Option<LoadingHints>,
}

impl CadModel {
    pub fn new(identifier: impl Into<String>, scene: SectorScene, data_source: Arc<dyn ModelDataSource>) -> Self {
        Self {
            identifier: identifier.into(),
            scene: Arc::new(scene),
            transform: Mat4::IDENTITY,
            data_source,
            loading_hints: None,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_loading_hints(mut self, hints: LoadingHints) -> Self {
        self.loading_hints = Some(hints);
        self
    }

    pub fn is_suspended(&self) -> bool {
        self.loading_hints.as_ref().is_some_and(|h| h.suspend_loading)
    }
}

impl fmt::Debug for CadModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CadModel")
            .field("identifier", &self.identifier)
            .field("sectors", &self.scene.sector_count())
            .field("transform", &self.transform)
            .finish()
    }
}
