//! Requests produced by the selector and their resolved outcomes

use std::fmt;
use std::sync::Arc;

use crate::core::types::Mat4;
use crate::repository::{ModelDataSource, SectorGroup};
use super::lod::LevelOfDetail;
use super::metadata::SectorMetadata;

/// A request to hold one sector at one level of detail.
#[derive(Clone)]
pub struct WantedSector {
    pub model_identifier: String,
    pub metadata: Arc<SectorMetadata>,
    pub level_of_detail: LevelOfDetail,
    pub model_transform: Mat4,
    pub data_source: Arc<dyn ModelDataSource>,
}

impl WantedSector {
    /// Key under which the resolved sector is cached
    pub fn cache_key(&self) -> String {
        format!("{}.{}.{}", self.model_identifier, self.metadata.id, self.level_of_detail)
    }
}

impl fmt::Debug for WantedSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WantedSector")
            .field("model_identifier", &self.model_identifier)
            .field("sector_id", &self.metadata.id)
            .field("level_of_detail", &self.level_of_detail)
            .finish()
    }
}

/// Outcome of a [`WantedSector`].
///
/// `group` is `None` for discarded sectors and for sectors whose load failed.
#[derive(Clone, Debug)]
pub struct ConsumedSector {
    pub model_identifier: String,
    pub metadata: Arc<SectorMetadata>,
    pub level_of_detail: LevelOfDetail,
    pub group: Option<Arc<SectorGroup>>,
}

impl ConsumedSector {
    /// Result carrying no geometry for `wanted`
    pub fn empty(wanted: &WantedSector) -> Self {
        Self {
            model_identifier: wanted.model_identifier.clone(),
            metadata: Arc::clone(&wanted.metadata),
            level_of_detail: wanted.level_of_detail,
            group: None,
        }
    }

    pub fn sector_id(&self) -> u32 {
        self.metadata.id
    }
}
