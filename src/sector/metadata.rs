//! Per-sector metadata: bounds, geometry file descriptors and children

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::math::Aabb;

/// Detailed-LOD geometry: the i3d index file and the CTM files it references.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    pub file_name: String,
    #[serde(default)]
    pub peripheral_files: Vec<String>,
    #[serde(default)]
    pub estimated_draw_call_count: u32,
    #[serde(default)]
    pub download_size: u64,
}

/// Fraction of each projection plane covered by geometry
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageFactors {
    pub xy: f32,
    pub yz: f32,
    pub xz: f32,
}

/// Simple-LOD geometry: quads from the f3d faces file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacesFile {
    /// Edge length of the quads in model units
    pub quad_size: f32,
    #[serde(default)]
    pub coverage_factors: CoverageFactors,
    #[serde(default)]
    pub recursive_coverage_factors: CoverageFactors,
    /// `None` when the sector has no simple geometry
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub download_size: u64,
}

/// Immutable description of one sector and its subtree.
#[derive(Clone, Debug, PartialEq)]
pub struct SectorMetadata {
    /// Unique within a model
    pub id: u32,
    /// Slash separated path of ancestor ids, e.g. `0/3/12/`
    pub path: String,
    pub depth: u32,
    pub bounds: Aabb,
    pub index_file: IndexFile,
    pub faces_file: FacesFile,
    pub children: Vec<Arc<SectorMetadata>>,
}

impl SectorMetadata {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the sector contributes quads at the simple level
    pub fn has_simple_geometry(&self) -> bool {
        self.faces_file.file_name.is_some()
    }

    /// Number of sectors in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_len()).sum::<usize>()
    }

    /// Pre-order depth-first walk. Returning `false` from `visit` skips the
    /// children of that sector.
    pub fn traverse<'a>(self: &'a Arc<Self>, visit: &mut impl FnMut(&'a Arc<SectorMetadata>) -> bool) {
        if visit(self) {
            for child in &self.children {
                child.traverse(visit);
            }
        }
    }

    /// Every sector in this subtree, pre-order
    pub fn flatten(self: &Arc<Self>) -> Vec<Arc<SectorMetadata>> {
        let mut out = Vec::with_capacity(self.subtree_len());
        self.traverse(&mut |s| {
            out.push(Arc::clone(s));
            true
        });
        out
    }
}
