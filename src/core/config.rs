//! Streaming configuration.
//!
//! All knobs of the pipeline live here so hosts can ship them as a JSON
//! file next to their application settings. Every section has defaults that
//! match the behavior of the engine when no configuration is given.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sector::LoadingHints;

/// Top-level configuration of the streaming engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Update scheduler timing.
    pub scheduler: SchedulerConfig,
    /// Cache sizes, concurrency and retry policy.
    pub repository: RepositoryConfig,
    /// Parser worker pool.
    pub parser: ParserConfig,
    /// Loading hints applied before the host sends its own.
    pub loading_hints: LoadingHints,
}

/// Scheduler timing parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum time between two selector ticks (ms).
    pub update_interval_ms: u64,
    /// Delay before the stream restarts after a pipeline error (ms).
    pub restart_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            restart_delay_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Cached repository parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Concurrency limiter capacity for fetch+parse operations.
    pub max_concurrent_operations: usize,
    /// Maximum resolved sector computations kept in memory.
    pub sector_cache_size: usize,
    /// Maximum resolved peripheral (CTM) file computations kept in memory.
    pub peripheral_cache_size: usize,
    /// Retries after the first failed fetch of a file.
    pub fetch_retries: u32,
    /// Concurrent peripheral fetches within a single detailed sector.
    pub peripheral_concurrency: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 50,
            sector_cache_size: 50,
            peripheral_cache_size: 300,
            fetch_retries: 3,
            peripheral_concurrency: 10,
        }
    }
}

/// Parser worker pool parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Number of parser threads. Fixed for the lifetime of the pool.
    pub worker_count: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { worker_count: 4 }
    }
}

impl StreamingConfig {
    /// Parse configuration from a JSON string. Missing fields use defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Save to file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<(), io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(io::Error::other)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)
    }

    /// Load from file (sync)
    pub fn load_sync(path: &Path) -> Result<Self, io::Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}
