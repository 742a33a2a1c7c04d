//! Fetching, decoding and caching sector geometry

pub mod cache;
pub mod rate_limiter;
pub mod data_source;
pub mod group;
pub mod cached;

pub use cache::RequestCache;
pub use rate_limiter::RateLimiter;
pub use data_source::{InMemoryDataSource, LocalDataSource, ModelDataSource, SCENE_FILE_NAME};
pub use group::{GroupGeometry, SectorGroup};
pub use cached::{CachedRepository, Resolution};
