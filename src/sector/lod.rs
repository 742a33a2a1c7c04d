//! Level of detail and the hints steering its selection

use std::fmt;

use serde::{Deserialize, Serialize};

/// How much of a sector's geometry should be resident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelOfDetail {
    /// Not loaded. Anything attached for the sector gets released.
    Discarded,
    /// Quad impostors from the faces file.
    Simple,
    /// Full primitive and mesh geometry from the index file.
    Detailed,
}

impl LevelOfDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelOfDetail::Discarded => "discarded",
            LevelOfDetail::Simple => "simple",
            LevelOfDetail::Detailed => "detailed",
        }
    }
}

impl fmt::Display for LevelOfDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs for the sector selector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingHints {
    /// Largest quad allowed on screen, as a fraction of screen height.
    /// Sectors whose quads would appear bigger get loaded in detail.
    pub max_quad_size: f32,
    /// When set, the scheduler leaves the affected models alone.
    pub suspend_loading: bool,
}

impl Default for LoadingHints {
    fn default() -> Self {
        Self {
            max_quad_size: 0.0025,
            suspend_loading: false,
        }
    }
}
