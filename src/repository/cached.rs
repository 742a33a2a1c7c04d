//! Cached sector repository
//!
//! Resolves [`WantedSector`]s into [`ConsumedSector`]s: discarded sectors
//! short-circuit, everything else goes through the coalescing sector cache
//! and, on a miss, through the rate limiter, the data source and the parser
//! pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::config::RepositoryConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::parser::{consolidate_sector, CtmMesh, ParserWorkerPool, SectorParser};
use crate::sector::{ConsumedSector, LevelOfDetail, WantedSector};
use super::cache::RequestCache;
use super::data_source::ModelDataSource;
use super::group::SectorGroup;
use super::rate_limiter::RateLimiter;

struct RepositoryInner {
    config: RepositoryConfig,
    sector_cache: RequestCache<String, ConsumedSector>,
    ctm_cache: RequestCache<String, CtmMesh>,
    limiter: RateLimiter,
    parser: ParserWorkerPool,
}

/// Shared handle to the repository. Clones refer to the same caches.
#[derive(Clone)]
pub struct CachedRepository {
    inner: Arc<RepositoryInner>,
}

impl CachedRepository {
    /// Repository with its own pool of `worker_count` parser threads
    pub fn new(config: RepositoryConfig, worker_count: usize) -> Self {
        Self::with_pool(config, ParserWorkerPool::new(worker_count))
    }

    /// Repository decoding with a custom parser
    pub fn with_parser(config: RepositoryConfig, worker_count: usize, parser: Arc<dyn SectorParser>) -> Self {
        Self::with_pool(config, ParserWorkerPool::with_parser(worker_count, parser))
    }

    fn with_pool(config: RepositoryConfig, parser: ParserWorkerPool) -> Self {
        log::info!(
            "Sector repository: {} concurrent operations, cache {}/{} entries, {} fetch retries",
            config.max_concurrent_operations,
            config.sector_cache_size,
            config.peripheral_cache_size,
            config.fetch_retries
        );
        Self {
            inner: Arc::new(RepositoryInner {
                sector_cache: RequestCache::new(config.sector_cache_size),
                ctm_cache: RequestCache::new(config.peripheral_cache_size),
                limiter: RateLimiter::new(config.max_concurrent_operations),
                parser,
                config,
            }),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Resolved or in-flight sector entries
    pub fn cached_sectors(&self) -> usize {
        self.inner.sector_cache.len()
    }

    /// Resolved or in-flight peripheral file entries
    pub fn cached_peripheral_files(&self) -> usize {
        self.inner.ctm_cache.len()
    }

    /// Abandon requests still waiting for a slot
    pub fn clear_pending(&self) -> u64 {
        self.inner.limiter.clear_pending()
    }

    /// Forget every resolved sector and peripheral file
    pub fn clear_cache(&self) {
        self.inner.sector_cache.clear();
        self.inner.ctm_cache.clear();
        log::debug!("Cleared sector caches");
    }

    /// Start resolving a tick's worth of wanted sectors. Supersedes every
    /// request from earlier ticks that has not started its I/O.
    pub fn resolve(&self, wanted: Vec<WantedSector>) -> Resolution {
        let generation = self.clear_pending();
        let mut resolution = Resolution::default();

        for sector in wanted {
            if sector.level_of_detail == LevelOfDetail::Discarded {
                resolution.ready.push_back(ConsumedSector::empty(&sector));
                continue;
            }
            let repository = self.clone();
            resolution.pending.spawn(async move {
                match repository.load_sector(&sector, generation).await {
                    Ok(consumed) => Ok(Some(consumed)),
                    Err(Error::Superseded) => {
                        log::trace!("Abandoned superseded request {}", sector.cache_key());
                        Ok(None)
                    }
                    Err(e @ Error::Pipeline(_)) => Err(e),
                    Err(e) => {
                        log::warn!(
                            "Failed to load sector {} of model '{}' at {}: {}",
                            sector.metadata.id, sector.model_identifier, sector.level_of_detail, e
                        );
                        Ok(Some(ConsumedSector::empty(&sector)))
                    }
                }
            });
        }
        resolution
    }

    /// Resolve one sector. Discarded sectors never touch cache or network.
    pub async fn load_sector(&self, wanted: &WantedSector, generation: u64) -> Result<ConsumedSector> {
        if wanted.level_of_detail == LevelOfDetail::Discarded {
            return Ok(ConsumedSector::empty(wanted));
        }
        self.inner
            .sector_cache
            .get_or_try_insert_with(wanted.cache_key(), || self.load_from_network(wanted, generation))
            .await
    }

    async fn load_from_network(&self, wanted: &WantedSector, generation: u64) -> Result<ConsumedSector> {
        // Slot is held through fetch, parse and consolidation
        let _permit = self
            .inner
            .limiter
            .acquire(generation)
            .await
            .ok_or(Error::Superseded)?;

        let group = match wanted.level_of_detail {
            LevelOfDetail::Simple => self.load_simple(wanted).await?,
            LevelOfDetail::Detailed => Some(self.load_detailed(wanted).await?),
            LevelOfDetail::Discarded => None,
        };
        log::debug!("Loaded {}", wanted.cache_key());

        Ok(ConsumedSector {
            group: group.map(Arc::new),
            ..ConsumedSector::empty(wanted)
        })
    }

    async fn load_simple(&self, wanted: &WantedSector) -> Result<Option<SectorGroup>> {
        let Some(file_name) = &wanted.metadata.faces_file.file_name else {
            return Ok(None);
        };
        let bytes = self.fetch_with_retry(wanted.data_source.as_ref(), file_name).await?;
        let quads = self.inner.parser.parse_quads(bytes).await?;
        Ok(Some(SectorGroup::quads(wanted.metadata.id, quads)))
    }

    async fn load_detailed(&self, wanted: &WantedSector) -> Result<SectorGroup> {
        let index_file = &wanted.metadata.index_file;

        // Peripheral meshes download while the index is fetched and parsed
        let peripheral_limit = Arc::new(Semaphore::new(self.inner.config.peripheral_concurrency.max(1)));
        let mut peripherals = JoinSet::new();
        for file_name in &index_file.peripheral_files {
            let repository = self.clone();
            let limit = Arc::clone(&peripheral_limit);
            let source = Arc::clone(&wanted.data_source);
            let key = format!("{}.{}", wanted.model_identifier, file_name);
            let file_name = file_name.clone();
            peripherals.spawn(async move {
                let _slot = limit
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Pipeline("peripheral limiter closed".into()))?;
                let mesh = repository.load_ctm(key, source.as_ref(), &file_name).await?;
                Ok::<_, Error>((file_name, mesh))
            });
        }

        let bytes = self.fetch_with_retry(wanted.data_source.as_ref(), &index_file.file_name).await?;
        let parsed = self.inner.parser.parse_sector(bytes).await?;

        let mut ctm_files: HashMap<String, CtmMesh> = HashMap::with_capacity(index_file.peripheral_files.len());
        while let Some(joined) = peripherals.join_next().await {
            let (file_name, mesh) = joined.map_err(|e| Error::Pipeline(format!("peripheral task failed: {}", e)))??;
            ctm_files.insert(file_name, mesh);
        }

        let sector_id = wanted.metadata.id;
        let geometry = tokio::task::spawn_blocking(move || consolidate_sector(parsed, &ctm_files))
            .await
            .map_err(|e| Error::Pipeline(format!("consolidation task failed: {}", e)))??;
        Ok(SectorGroup::detailed(sector_id, geometry))
    }

    async fn load_ctm(&self, key: String, source: &dyn ModelDataSource, file_name: &str) -> Result<CtmMesh> {
        self.inner
            .ctm_cache
            .get_or_try_insert_with(key, || async move {
                let bytes = self.fetch_with_retry(source, file_name).await?;
                Ok(Arc::new(self.inner.parser.parse_ctm(bytes).await?))
            })
            .await
    }

    /// Fetch with up to `fetch_retries` immediate retries on transient errors
    async fn fetch_with_retry(&self, source: &dyn ModelDataSource, file_name: &str) -> Result<Vec<u8>> {
        let retries = self.inner.config.fetch_retries;
        let mut attempt = 0;
        loop {
            match source.fetch_data(file_name).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    log::debug!("Retrying '{}' ({}/{}): {}", file_name, attempt, retries, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Results of one [`CachedRepository::resolve`] call. Discarded sectors are
/// available right away; the rest arrive as they finish loading.
#[derive(Default)]
pub struct Resolution {
    ready: VecDeque<ConsumedSector>,
    pending: JoinSet<Result<Option<ConsumedSector>>>,
}

impl Resolution {
    /// Sectors available without waiting (discarded ones)
    pub fn take_ready(&mut self) -> Vec<ConsumedSector> {
        self.ready.drain(..).collect()
    }

    /// Requests still loading
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finished(&self) -> bool {
        self.ready.is_empty() && self.pending.is_empty()
    }

    /// Next consumed sector, or `None` once everything has settled.
    /// Superseded requests are skipped. A pipeline error or a panicked task
    /// surfaces as `Err`.
    pub async fn next(&mut self) -> Option<Result<ConsumedSector>> {
        if let Some(ready) = self.ready.pop_front() {
            return Some(Ok(ready));
        }
        while let Some(joined) = self.pending.join_next().await {
            match joined {
                Ok(Ok(Some(consumed))) => return Some(Ok(consumed)),
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => return Some(Err(e)),
                Err(e) => return Some(Err(Error::Pipeline(format!("sector task failed: {}", e)))),
            }
        }
        None
    }

    /// Stop waiting on everything still loading
    pub fn abort(&mut self) {
        self.ready.clear();
        self.pending.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::core::types::{Mat4, Vec3};
    use crate::math::Aabb;
    use crate::parser::ctm::encode_ctm_mg1;
    use crate::parser::f3d::encode_quads;
    use crate::parser::i3d::{encode_sector, I3D_VERSION};
    use crate::parser::{ParseCtmResult, ParseError, ParseSectorResult, QuadInstance, TriangleMeshTable};
    use crate::repository::{GroupGeometry, InMemoryDataSource};
    use crate::sector::{FacesFile, IndexFile, SectorMetadata};

    fn metadata(id: u32, peripheral_files: Vec<String>) -> Arc<SectorMetadata> {
        Arc::new(SectorMetadata {
            id,
            path: format!("0/{}/", id),
            depth: 1,
            bounds: Aabb::new(Vec3::ZERO, Vec3::ONE),
            index_file: IndexFile {
                file_name: format!("sector_{}.i3d", id),
                peripheral_files,
                ..Default::default()
            },
            faces_file: FacesFile {
                quad_size: 0.1,
                file_name: Some(format!("sector_{}.f3d", id)),
                ..Default::default()
            },
            children: Vec::new(),
        })
    }

    fn wanted(source: Arc<dyn ModelDataSource>, id: u32, lod: LevelOfDetail) -> WantedSector {
        WantedSector {
            model_identifier: "model".into(),
            metadata: metadata(id, vec!["mesh_1.ctm".into()]),
            level_of_detail: lod,
            model_transform: Mat4::IDENTITY,
            data_source: source,
        }
    }

    fn config(max_concurrent_operations: usize) -> RepositoryConfig {
        RepositoryConfig { max_concurrent_operations, ..Default::default() }
    }

    fn quads_source(ids: impl IntoIterator<Item = u32>) -> Arc<InMemoryDataSource> {
        let source = InMemoryDataSource::new();
        for id in ids {
            source.insert(format!("sector_{}.f3d", id), encode_quads(&[QuadInstance::default(); 2]));
        }
        Arc::new(source)
    }

    /// Counts concurrent fetches and delays each one
    #[derive(Default)]
    struct SlowSource {
        current: AtomicUsize,
        peak: AtomicUsize,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ModelDataSource for SlowSource {
        async fn fetch_json(&self, _: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn fetch_data(&self, _: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    async fn drain(mut resolution: Resolution) -> Vec<ConsumedSector> {
        let mut out = Vec::new();
        while let Some(next) = resolution.next().await {
            out.push(next.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_discarded_never_fetches() {
        let source = quads_source([7]);
        let repository = CachedRepository::new(config(4), 1);

        let resolution = repository.resolve(vec![wanted(source.clone(), 7, LevelOfDetail::Discarded)]);
        let consumed = drain(resolution).await;

        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].sector_id(), 7);
        assert_eq!(consumed[0].level_of_detail, LevelOfDetail::Discarded);
        assert!(consumed[0].group.is_none());
        assert_eq!(source.fetch_count(), 0);
        assert_eq!(repository.cached_sectors(), 0);
    }

    #[tokio::test]
    async fn test_simple_sector_loads_quads() {
        let source = quads_source([1]);
        let repository = CachedRepository::new(config(4), 1);
        let request = wanted(source.clone(), 1, LevelOfDetail::Simple);

        let consumed = repository.load_sector(&request, repository.rate_limiter().generation()).await.unwrap();
        let group = consumed.group.unwrap();
        assert_eq!(group.name(), "Quads 1");
        match group.geometry() {
            GroupGeometry::Quads(q) => assert_eq!(q.instance_count(), 2),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let source = quads_source([1]);
        let repository = CachedRepository::new(config(4), 2);
        let request = wanted(source.clone(), 1, LevelOfDetail::Simple);
        let generation = repository.rate_limiter().generation();

        let (a, b) = tokio::join!(
            repository.load_sector(&request, generation),
            repository.load_sector(&request, generation),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(source.fetch_count(), 1);
        assert!(Arc::ptr_eq(a.group.as_ref().unwrap(), b.group.as_ref().unwrap()));

        // Cache hit afterwards
        repository.load_sector(&request, generation).await.unwrap();
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_operations_bounded() {
        let source = Arc::new(SlowSource::default());
        let repository = CachedRepository::new(config(2), 2);
        let requests = (0..5).map(|id| wanted(source.clone(), id, LevelOfDetail::Simple)).collect();

        let consumed = drain(repository.resolve(requests)).await;
        assert_eq!(consumed.len(), 5);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 5);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(repository.rate_limiter().available(), 2);
    }

    #[tokio::test]
    async fn test_new_tick_supersedes_waiting_requests() {
        let source = Arc::new(SlowSource::default());
        let repository = CachedRepository::new(config(1), 1);

        let first = repository.resolve((0..4).map(|id| wanted(source.clone(), id, LevelOfDetail::Simple)).collect());
        // Let the first request take the only slot
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = repository.resolve(vec![wanted(source.clone(), 10, LevelOfDetail::Simple)]);

        let stale = drain(first).await;
        let fresh = drain(second).await;

        // Only the request already holding a slot ran
        assert_eq!(stale.len(), 1);
        assert_eq!(fresh.len(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        // Abandoned requests leave nothing behind in the cache
        assert_eq!(repository.cached_sectors(), 2);
    }

    #[tokio::test]
    async fn test_started_request_fills_cache_for_next_tick() {
        let source = Arc::new(SlowSource::default());
        let repository = CachedRepository::new(config(1), 1);
        let request = |id| wanted(source.clone(), id, LevelOfDetail::Simple);

        let first = repository.resolve(vec![request(0), request(1), request(2)]);
        // Sector 0 takes the only slot; 1 and 2 wait for it
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = repository.resolve(vec![request(0), request(1)]);

        let stale = drain(first).await;
        let fresh = drain(second).await;
        assert_eq!(stale.iter().map(ConsumedSector::sector_id).collect::<Vec<_>>(), vec![0]);
        assert_eq!(fresh.len(), 2);
        // Sector 0 finished for both ticks off one fetch, sector 1 ran once
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(repository.cached_sectors(), 2);

        let third = drain(repository.resolve(vec![request(0), request(1)])).await;
        assert_eq!(third.len(), 2);
        assert!(third.iter().all(|c| c.group.is_some()));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_retried_then_reported() {
        let source = Arc::new(InMemoryDataSource::new());
        let repository = CachedRepository::new(config(4), 1);

        let consumed = drain(repository.resolve(vec![wanted(source.clone(), 3, LevelOfDetail::Simple)])).await;
        assert_eq!(consumed.len(), 1);
        assert!(consumed[0].group.is_none());
        // First attempt plus three retries
        assert_eq!(source.fetch_count(), 4);
        assert_eq!(repository.cached_sectors(), 0);
    }

    #[tokio::test]
    async fn test_bad_stride_not_retried() {
        let source = Arc::new(InMemoryDataSource::new());
        source.insert("sector_3.f3d", vec![0; 10]);
        let repository = CachedRepository::new(config(4), 1);
        let request = wanted(source.clone(), 3, LevelOfDetail::Simple);

        let err = repository.load_sector(&request, repository.rate_limiter().generation()).await.unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::InvalidStride { len: 10, stride: 92 })));
        assert_eq!(source.fetch_count(), 1);
    }

    fn detailed_source(sector_ids: &[u32]) -> Arc<InMemoryDataSource> {
        let source = InMemoryDataSource::new();
        let mesh = ParseCtmResult {
            indices: vec![0, 1, 2, 1, 2, 3],
            vertices: vec![0.0; 12],
            normals: None,
        };
        source.insert("mesh_1.ctm", encode_ctm_mg1(&mesh).unwrap());
        for &id in sector_ids {
            let sector = ParseSectorResult {
                version: I3D_VERSION,
                sector_id: id,
                triangle_meshes: TriangleMeshTable {
                    file_ids: vec![1],
                    tree_indices: vec![id],
                    colors: vec![[10, 20, 30, 255]],
                    triangle_counts: vec![2],
                },
                ..Default::default()
            };
            source.insert(format!("sector_{}.i3d", id), encode_sector(&sector).unwrap());
        }
        Arc::new(source)
    }

    #[tokio::test]
    async fn test_detailed_sector_consolidated() {
        let source = detailed_source(&[1, 2]);
        let repository = CachedRepository::new(config(4), 2);

        let consumed = drain(repository.resolve(vec![
            wanted(source.clone(), 1, LevelOfDetail::Detailed),
            wanted(source.clone(), 2, LevelOfDetail::Detailed),
        ]))
        .await;
        assert_eq!(consumed.len(), 2);

        for sector in &consumed {
            let group = sector.group.as_ref().unwrap();
            assert_eq!(group.name(), format!("Sector {}", sector.sector_id()));
            match group.geometry() {
                GroupGeometry::Detailed(g) => {
                    assert_eq!(g.triangle_meshes.len(), 1);
                    assert!(g.triangle_meshes[0].tree_indices.iter().all(|&t| t == sector.sector_id()));
                }
                other => panic!("unexpected geometry {:?}", other),
            }
        }
        // The shared peripheral file was fetched once
        assert_eq!(source.fetch_count(), 3);
        assert_eq!(repository.cached_peripheral_files(), 1);
    }

    #[tokio::test]
    async fn test_missing_peripheral_fails_sector() {
        let source = detailed_source(&[1]);
        let repository = CachedRepository::new(config(4), 1);
        let mut request = wanted(source.clone(), 1, LevelOfDetail::Detailed);
        request.metadata = metadata(1, vec!["mesh_9.ctm".into()]);

        let err = repository.load_sector(&request, repository.rate_limiter().generation()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_sector_cache_evicts() {
        let source = quads_source(0..3);
        let repository = CachedRepository::new(
            RepositoryConfig { sector_cache_size: 2, ..Default::default() },
            1,
        );
        for id in 0..3 {
            let request = wanted(source.clone(), id, LevelOfDetail::Simple);
            repository.load_sector(&request, repository.rate_limiter().generation()).await.unwrap();
        }
        assert_eq!(repository.cached_sectors(), 2);

        repository.clear_cache();
        assert_eq!(repository.cached_sectors(), 0);
    }
}
