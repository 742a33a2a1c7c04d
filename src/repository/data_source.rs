//! Where model bytes come from

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::core::error::Error;
use crate::core::types::Result;

/// Byte source for one model. How bytes are obtained (HTTP, SDK, disk) is
/// up to the implementation.
#[async_trait]
pub trait ModelDataSource: Send + Sync {
    /// Fetch a JSON document, e.g. the scene descriptor
    async fn fetch_json(&self, name: &str) -> Result<Vec<u8>>;

    /// Fetch a binary geometry file
    async fn fetch_data(&self, name: &str) -> Result<Vec<u8>>;
}

/// Name of the scene descriptor every model provides
pub const SCENE_FILE_NAME: &str = "scene.json";

/// Reads model files from a local directory
#[derive(Clone, Debug)]
pub struct LocalDataSource {
    root: PathBuf,
}

impl LocalDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        tokio::fs::read(&path).await.map_err(|e| Error::Fetch {
            file: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ModelDataSource for LocalDataSource {
    async fn fetch_json(&self, name: &str) -> Result<Vec<u8>> {
        self.read(name).await
    }

    async fn fetch_data(&self, name: &str) -> Result<Vec<u8>> {
        self.read(name).await
    }
}

/// Serves files from memory and counts fetches. Useful for hosts that
/// already hold the model and for exercising the pipeline.
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), bytes);
    }

    /// Total fetch calls, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Fetch { file: name.to_string(), message: "not found".into() })
    }
}

#[async_trait]
impl ModelDataSource for InMemoryDataSource {
    async fn fetch_json(&self, name: &str) -> Result<Vec<u8>> {
        self.get(name)
    }

    async fn fetch_data(&self, name: &str) -> Result<Vec<u8>> {
        self.get(name)
    }
}
