//! Update scheduler
//!
//! A single coordinator task owns the latest camera, clipping planes,
//! loading hints and model set. Input changes arrive as events; the first
//! change after an idle period arms a deadline one update interval away and
//! further changes before that deadline are folded into the same tick.
//! Each tick runs the selector, filters out sectors whose level of detail
//! did not change and hands the rest to the repository.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};

use crate::core::camera::Camera;
use crate::core::config::SchedulerConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::culling::{CullingInput, SectorCuller};
use crate::math::Plane;
use crate::repository::CachedRepository;
use crate::sector::{CadModel, ConsumedSector, LevelOfDetail, LoadingHints, WantedSector};

/// Input changes fed to the coordinator
#[derive(Debug)]
pub enum SchedulerEvent {
    Camera(Camera),
    ClippingPlanes { planes: Vec<Plane>, intersection: bool },
    LoadingHints(LoadingHints),
    ModelAdded(Arc<CadModel>),
    ModelRemoved(String),
    /// Per-model hints; `None` falls back to the global ones
    ModelLoadingHints { model: String, hints: Option<LoadingHints> },
    ClearCache,
}

/// Progress of the current tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadingState {
    pub is_loading: bool,
    pub items_requested: usize,
    pub items_loaded: usize,
}

type SectorKey = (String, u32);

fn key_of(model: &str, sector_id: u32) -> SectorKey {
    (model.to_string(), sector_id)
}

/// Result of one sector, tagged with the tick that requested it
struct TickResult {
    tick: u64,
    result: Result<ConsumedSector>,
}

struct Coordinator {
    config: SchedulerConfig,
    culler: Arc<dyn SectorCuller>,
    repository: CachedRepository,

    camera: Option<Camera>,
    clipping_planes: Vec<Plane>,
    clip_intersection: bool,
    hints: LoadingHints,
    models: Vec<Arc<CadModel>>,

    /// Level of detail last handed to the consumer
    delivered: HashMap<SectorKey, LevelOfDetail>,
    /// Level of detail wanted by the most recent tick
    wanted_now: HashMap<SectorKey, LevelOfDetail>,

    tick: u64,
    output: mpsc::UnboundedSender<ConsumedSector>,
    loading_state: watch::Sender<LoadingState>,
}

impl Coordinator {
    fn apply(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Camera(camera) => self.camera = Some(camera),
            SchedulerEvent::ClippingPlanes { planes, intersection } => {
                self.clipping_planes = planes;
                self.clip_intersection = intersection;
            }
            SchedulerEvent::LoadingHints(hints) => self.hints = hints,
            SchedulerEvent::ModelAdded(model) => {
                log::info!("Model '{}' added with {} sectors", model.identifier, model.scene.sector_count());
                self.forget_model(&model.identifier);
                self.models.push(model);
            }
            SchedulerEvent::ModelRemoved(identifier) => {
                log::info!("Model '{}' removed", identifier);
                self.forget_model(&identifier);
            }
            SchedulerEvent::ModelLoadingHints { model, hints } => {
                if let Some(m) = self.models.iter_mut().find(|m| m.identifier == model) {
                    let mut updated = (**m).clone();
                    updated.loading_hints = hints;
                    *m = Arc::new(updated);
                }
            }
            SchedulerEvent::ClearCache => self.repository.clear_cache(),
        }
    }

    fn forget_model(&mut self, identifier: &str) {
        self.models.retain(|m| m.identifier != identifier);
        self.delivered.retain(|(model, _), _| model != identifier);
        self.wanted_now.retain(|(model, _), _| model != identifier);
    }

    /// Run the selector and start resolving what changed.
    fn run_tick(&mut self, forwarders: &mut JoinSet<()>, results: &mpsc::UnboundedSender<TickResult>) -> Result<()> {
        let Some(camera) = self.camera else {
            return Ok(());
        };
        let active: Vec<Arc<CadModel>> = self.models.iter().filter(|m| !m.is_suspended()).cloned().collect();
        if active.is_empty() || self.hints.suspend_loading {
            return Ok(());
        }

        let wanted = match self.culler.determine_wanted(&CullingInput {
            camera: &camera,
            clipping_planes: &self.clipping_planes,
            clip_intersection: self.clip_intersection,
            loading_hints: &self.hints,
            models: &active,
        }) {
            Ok(wanted) => wanted,
            Err(e) if e.is_configuration() => {
                // Retrying cannot help; wait for the next input change
                log::error!("Sector selection failed: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.tick += 1;
        for model in &active {
            self.wanted_now.retain(|(m, _), _| *m != model.identifier);
        }
        self.wanted_now.extend(
            wanted
                .iter()
                .map(|w| (key_of(&w.model_identifier, w.metadata.id), w.level_of_detail)),
        );

        let changed: Vec<WantedSector> = wanted
            .into_iter()
            .filter(|w| {
                let last = self
                    .delivered
                    .get(&key_of(&w.model_identifier, w.metadata.id))
                    .copied()
                    .unwrap_or(LevelOfDetail::Discarded);
                last != w.level_of_detail
            })
            .collect();

        let requested = changed.iter().filter(|w| w.level_of_detail != LevelOfDetail::Discarded).count();
        log::debug!("Tick {}: {} sectors changed level of detail", self.tick, changed.len());
        self.loading_state.send_replace(LoadingState {
            is_loading: requested > 0,
            items_requested: requested,
            items_loaded: 0,
        });

        let mut resolution = self.repository.resolve(changed);
        for consumed in resolution.take_ready() {
            self.deliver(consumed);
        }
        if resolution.pending() > 0 {
            let tick = self.tick;
            let results = results.clone();
            forwarders.spawn(async move {
                while let Some(result) = resolution.next().await {
                    if results.send(TickResult { tick, result }).is_err() {
                        break;
                    }
                }
            });
        }
        Ok(())
    }

    /// Hand a result to the consumer if its level of detail is still wanted.
    fn deliver(&mut self, consumed: ConsumedSector) {
        let key = key_of(&consumed.model_identifier, consumed.sector_id());
        if self.wanted_now.get(&key) != Some(&consumed.level_of_detail) {
            log::trace!("Dropping stale {} result for {:?}", consumed.level_of_detail, key);
            return;
        }
        if self.delivered.get(&key) == Some(&consumed.level_of_detail) {
            return;
        }

        let failed = consumed.group.is_none() && consumed.level_of_detail != LevelOfDetail::Discarded;
        if !failed {
            self.delivered.insert(key, consumed.level_of_detail);
        }
        let _ = self.output.send(consumed);
    }

    fn record_loaded(&mut self, tick: u64) {
        if tick != self.tick {
            return;
        }
        self.loading_state.send_modify(|state| {
            state.items_loaded += 1;
            state.is_loading = state.items_loaded < state.items_requested;
        });
    }

    fn reset_loading_state(&self) {
        self.loading_state.send_replace(LoadingState::default());
    }

    async fn worker_loop(mut self, mut events: mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<TickResult>();
        let mut forwarders: JoinSet<()> = JoinSet::new();
        let mut deadline: Option<Instant> = None;
        let mut restarting = false;

        loop {
            let wake = deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.apply(event);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + self.config.update_interval());
                    }
                }

                _ = sleep_until(wake), if deadline.is_some() => {
                    deadline = None;
                    if restarting {
                        log::info!("Restarting sector stream");
                        restarting = false;
                    }
                    if let Err(e) = self.run_tick(&mut forwarders, &results_tx) {
                        log::error!("Sector stream failed, restarting in {:?}: {}", self.config.restart_delay(), e);
                        forwarders.abort_all();
                        self.reset_loading_state();
                        deadline = Some(Instant::now() + self.config.restart_delay());
                        restarting = true;
                    }
                }

                Some(TickResult { tick, result }) = results_rx.recv() => {
                    match result {
                        Ok(consumed) => {
                            self.record_loaded(tick);
                            self.deliver(consumed);
                        }
                        Err(e) => {
                            log::error!("Sector stream failed, restarting in {:?}: {}", self.config.restart_delay(), e);
                            forwarders.abort_all();
                            // Results already queued belong to aborted work
                            while results_rx.try_recv().is_ok() {}
                            self.reset_loading_state();
                            deadline = Some(Instant::now() + self.config.restart_delay());
                            restarting = true;
                        }
                    }
                }

                Some(_) = forwarders.join_next(), if !forwarders.is_empty() => {}
            }
        }

        forwarders.abort_all();
        log::debug!("Update scheduler stopped");
    }
}

/// Handle to the running coordinator. Dropping it stops the coordinator.
pub struct UpdateScheduler {
    events: mpsc::UnboundedSender<SchedulerEvent>,
    loading_state: watch::Receiver<LoadingState>,
    task: JoinHandle<()>,
}

impl UpdateScheduler {
    /// Spawn the coordinator on the current tokio runtime. Consumed sectors
    /// arrive on the returned receiver.
    pub fn spawn(
        config: SchedulerConfig,
        hints: LoadingHints,
        culler: Arc<dyn SectorCuller>,
        repository: CachedRepository,
    ) -> (Self, mpsc::UnboundedReceiver<ConsumedSector>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LoadingState::default());

        let coordinator = Coordinator {
            config,
            culler,
            repository,
            camera: None,
            clipping_planes: Vec::new(),
            clip_intersection: false,
            hints,
            models: Vec::new(),
            delivered: HashMap::new(),
            wanted_now: HashMap::new(),
            tick: 0,
            output: output_tx,
            loading_state: state_tx,
        };
        let task = tokio::spawn(coordinator.worker_loop(events_rx));

        (
            Self { events: events_tx, loading_state: state_rx, task },
            output_rx,
        )
    }

    /// Queue an input change
    pub fn send(&self, event: SchedulerEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::Pipeline("update scheduler has stopped".into()))
    }

    pub fn set_camera(&self, camera: Camera) -> Result<()> {
        self.send(SchedulerEvent::Camera(camera))
    }

    pub fn set_clipping_planes(&self, planes: Vec<Plane>, intersection: bool) -> Result<()> {
        self.send(SchedulerEvent::ClippingPlanes { planes, intersection })
    }

    pub fn set_loading_hints(&self, hints: LoadingHints) -> Result<()> {
        self.send(SchedulerEvent::LoadingHints(hints))
    }

    pub fn add_model(&self, model: Arc<CadModel>) -> Result<()> {
        self.send(SchedulerEvent::ModelAdded(model))
    }

    pub fn remove_model(&self, identifier: impl Into<String>) -> Result<()> {
        self.send(SchedulerEvent::ModelRemoved(identifier.into()))
    }

    pub fn set_model_loading_hints(&self, model: impl Into<String>, hints: Option<LoadingHints>) -> Result<()> {
        self.send(SchedulerEvent::ModelLoadingHints { model: model.into(), hints })
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.send(SchedulerEvent::ClearCache)
    }

    /// Watch progress of the current tick
    pub fn loading_state(&self) -> watch::Receiver<LoadingState> {
        self.loading_state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
