//! Renderable groups handed to the renderer

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::parser::{ParseQuadsResult, SectorGeometry};

/// Geometry payload of a group
#[derive(Clone, Debug)]
pub enum GroupGeometry {
    Quads(Arc<ParseQuadsResult>),
    Detailed(Arc<SectorGeometry>),
}

/// Batch of geometry for one sector at one level of detail.
///
/// The same group can be attached to several scene nodes, so it counts its
/// attachments. Its renderer resources are released when the count returns
/// to zero.
#[derive(Debug)]
pub struct SectorGroup {
    name: String,
    geometry: GroupGeometry,
    attachments: AtomicUsize,
}

impl SectorGroup {
    pub fn quads(sector_id: u32, quads: ParseQuadsResult) -> Self {
        Self {
            name: format!("Quads {}", sector_id),
            geometry: GroupGeometry::Quads(Arc::new(quads)),
            attachments: AtomicUsize::new(0),
        }
    }

    pub fn detailed(sector_id: u32, geometry: SectorGeometry) -> Self {
        Self {
            name: format!("Sector {}", sector_id),
            geometry: GroupGeometry::Detailed(Arc::new(geometry)),
            attachments: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &GroupGeometry {
        &self.geometry
    }

    pub fn is_empty(&self) -> bool {
        match &self.geometry {
            GroupGeometry::Quads(q) => q.instance_count() == 0,
            GroupGeometry::Detailed(d) => d.primitives.is_empty() && d.mesh_draw_calls() == 0,
        }
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.load(Ordering::Acquire)
    }

    /// Register one more attachment. Returns the new count.
    pub fn retain(&self) -> usize {
        self.attachments.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one attachment. Returns the remaining count; zero means the
    /// renderer resources can be disposed.
    pub fn release(&self) -> usize {
        let previous = self
            .attachments
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous == 0 {
            log::warn!("Released group '{}' that had no attachments", self.name);
        }
        previous.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(SectorGroup::quads(3, ParseQuadsResult::default()).name(), "Quads 3");
        assert_eq!(SectorGroup::detailed(3, SectorGeometry::default()).name(), "Sector 3");
    }

    #[test]
    fn test_refcount() {
        let group = SectorGroup::quads(1, ParseQuadsResult::default());
        assert!(group.is_empty());
        assert_eq!(group.retain(), 1);
        assert_eq!(group.retain(), 2);
        assert_eq!(group.release(), 1);
        assert_eq!(group.release(), 0);
        // Never underflows
        assert_eq!(group.release(), 0);
        assert_eq!(group.attachment_count(), 0);
    }
}
