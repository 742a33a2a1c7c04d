//! Scene descriptor parsing
//!
//! A scene file lists every sector of a model flat, linked into a tree by
//! `parentId`. The tree is validated and frozen into [`SectorMetadata`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::Aabb;
use super::metadata::{FacesFile, IndexFile, SectorMetadata};

/// Slack allowed when checking that a child's bounds sit inside its parent
const BOUNDS_TOLERANCE: f32 = 1e-3;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScene {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    max_tree_index: u32,
    #[serde(default)]
    unit: Option<String>,
    sectors: Vec<RawSector>,
}

#[derive(Deserialize)]
struct RawVec3 {
    x: f32,
    y: f32,
    z: f32,
}

impl From<&RawVec3> for Vec3 {
    fn from(v: &RawVec3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

#[derive(Deserialize)]
struct RawBox {
    min: RawVec3,
    max: RawVec3,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSector {
    id: u32,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    path: String,
    #[serde(default)]
    depth: u32,
    bounding_box: RawBox,
    index_file: IndexFile,
    faces_file: FacesFile,
}

impl RawSector {
    fn parent(&self) -> Option<u32> {
        match self.parent_id {
            Some(p) if p >= 0 => u32::try_from(p).ok(),
            _ => None,
        }
    }
}

/// Sector tree of one model plus an id lookup.
#[derive(Clone, Debug)]
pub struct SectorScene {
    pub version: u32,
    pub max_tree_index: u32,
    pub unit: Option<String>,
    pub root: Arc<SectorMetadata>,
    by_id: HashMap<u32, Arc<SectorMetadata>>,
}

impl SectorScene {
    /// Parse and validate a scene descriptor.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let raw: RawScene = serde_json::from_slice(json)?;
        Self::from_raw(raw)
    }

    /// Build from an already constructed root sector.
    pub fn from_root(root: Arc<SectorMetadata>) -> Result<Self> {
        let mut by_id = HashMap::new();
        for sector in root.flatten() {
            if by_id.insert(sector.id, Arc::clone(&sector)).is_some() {
                return Err(Error::InvalidScene(format!("duplicate sector id {}", sector.id)));
            }
        }
        Ok(Self { version: 0, max_tree_index: 0, unit: None, root, by_id })
    }

    fn from_raw(raw: RawScene) -> Result<Self> {
        let mut raw_by_id: HashMap<u32, RawSector> = HashMap::with_capacity(raw.sectors.len());
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut root_id = None;
        let total = raw.sectors.len();

        for sector in raw.sectors {
            let id = sector.id;
            match sector.parent() {
                Some(parent) => children.entry(parent).or_default().push(id),
                None => {
                    if let Some(existing) = root_id {
                        return Err(Error::InvalidScene(format!(
                            "multiple root sectors ({} and {})", existing, id
                        )));
                    }
                    root_id = Some(id);
                }
            }
            if raw_by_id.insert(id, sector).is_some() {
                return Err(Error::InvalidScene(format!("duplicate sector id {}", id)));
            }
        }

        if let Some(parent) = children.keys().find(|p| !raw_by_id.contains_key(p)) {
            return Err(Error::InvalidScene(format!("unknown parent sector {}", parent)));
        }
        let root_id = root_id.ok_or_else(|| Error::InvalidScene("no root sector".into()))?;

        let root = build_subtree(root_id, &mut raw_by_id, &children)?;
        let scene = Self {
            version: raw.version,
            max_tree_index: raw.max_tree_index,
            unit: raw.unit,
            ..Self::from_root(root)?
        };

        if scene.by_id.len() != total {
            return Err(Error::InvalidScene(format!(
                "{} of {} sectors are not reachable from the root",
                total - scene.by_id.len(),
                total
            )));
        }
        log::debug!("Parsed scene with {} sectors (version {})", total, scene.version);
        Ok(scene)
    }

    pub fn get(&self, id: u32) -> Option<&Arc<SectorMetadata>> {
        self.by_id.get(&id)
    }

    pub fn sector_count(&self) -> usize {
        self.by_id.len()
    }

    /// All sectors, pre-order from the root
    pub fn sectors(&self) -> Vec<Arc<SectorMetadata>> {
        self.root.flatten()
    }
}

fn build_subtree(
    id: u32,
    raw_by_id: &mut HashMap<u32, RawSector>,
    children: &HashMap<u32, Vec<u32>>,
) -> Result<Arc<SectorMetadata>> {
    // Removing as we go also breaks parent cycles
    let raw = raw_by_id
        .remove(&id)
        .ok_or_else(|| Error::InvalidScene(format!("sector {} reached twice", id)))?;
    let bounds = Aabb::new((&raw.bounding_box.min).into(), (&raw.bounding_box.max).into());
    if !bounds.is_valid() {
        return Err(Error::InvalidScene(format!("sector {} has inverted bounds", id)));
    }

    let mut built = Vec::new();
    for child_id in children.get(&id).map(Vec::as_slice).unwrap_or_default() {
        let child = build_subtree(*child_id, raw_by_id, children)?;
        if !bounds.inflated(BOUNDS_TOLERANCE).encloses(&child.bounds) {
            return Err(Error::InvalidScene(format!(
                "bounds of sector {} exceed those of parent {}", child.id, id
            )));
        }
        built.push(child);
    }

    Ok(Arc::new(SectorMetadata {
        id,
        path: raw.path,
        depth: raw.depth,
        bounds,
        index_file: raw.index_file,
        faces_file: raw.faces_file,
        children: built,
    }))
}
