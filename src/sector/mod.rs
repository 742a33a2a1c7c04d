//! Sector data model
//!
//! A model is partitioned into a tree of sectors. Each sector can be loaded
//! at a coarse quad level or with its full detailed geometry.

pub mod lod;
pub mod metadata;
pub mod model;
pub mod scene;
pub mod wanted;

pub use lod::{LevelOfDetail, LoadingHints};
pub use metadata::{CoverageFactors, FacesFile, IndexFile, SectorMetadata};
pub use model::CadModel;
pub use scene::SectorScene;
pub use wanted::{ConsumedSector, WantedSector};
