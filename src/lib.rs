//! Sectorstream - level-of-detail sector streaming for large CAD models

pub mod core;
pub mod math;
pub mod sector;
pub mod culling;
pub mod parser;
pub mod repository;
pub mod scheduler;
pub mod manager;

pub use crate::core::{Camera, Error, Result, StreamingConfig};
pub use culling::{CullingInput, ScreenCoverageCuller, SectorCuller};
pub use manager::{CadManager, RendererHandle};
pub use repository::{CachedRepository, InMemoryDataSource, LocalDataSource, ModelDataSource, SectorGroup};
pub use scheduler::{LoadingState, SchedulerEvent, UpdateScheduler};
pub use sector::{CadModel, ConsumedSector, LevelOfDetail, LoadingHints, SectorScene, WantedSector};
