//! Decoded geometry, before and after consolidation

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use rkyv::{Archive, Deserialize, Serialize};

/// Oriented box primitive
#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BoxPrimitive {
    pub node_id: u64,
    pub tree_index: u32,
    pub color: [u8; 4],
    pub center: [f32; 3],
    pub normal: [f32; 3],
    pub delta: [f32; 3],
    pub rotation_angle: f32,
}

/// Cone or cylinder segment primitive
#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ConePrimitive {
    pub node_id: u64,
    pub tree_index: u32,
    pub color: [u8; 4],
    pub center_a: [f32; 3],
    pub center_b: [f32; 3],
    pub radius_a: f32,
    pub radius_b: f32,
    pub angle: f32,
    pub arc_angle: f32,
    pub local_x_axis: [f32; 3],
}

/// Flat disc primitive
#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CirclePrimitive {
    pub node_id: u64,
    pub tree_index: u32,
    pub color: [u8; 4],
    pub center: [f32; 3],
    pub normal: [f32; 3],
    pub radius: f32,
}

/// Generic primitives of a detailed sector, grouped by kind
#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PrimitiveCollections {
    pub boxes: Vec<BoxPrimitive>,
    pub cones: Vec<ConePrimitive>,
    pub circles: Vec<CirclePrimitive>,
}

impl PrimitiveCollections {
    pub fn len(&self) -> usize {
        self.boxes.len() + self.cones.len() + self.circles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Triangle meshes of a sector, one row per mesh. Geometry lives in the
/// peripheral CTM file named by `file_ids`.
#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct TriangleMeshTable {
    pub file_ids: Vec<u64>,
    pub tree_indices: Vec<u32>,
    pub colors: Vec<[u8; 4]>,
    pub triangle_counts: Vec<u32>,
}

/// Instanced meshes of a sector, one row per instance. Instances sharing a
/// file and triangle offset draw the same triangles.
#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct InstancedMeshTable {
    pub file_ids: Vec<u64>,
    pub tree_indices: Vec<u32>,
    pub colors: Vec<[u8; 4]>,
    pub triangle_offsets: Vec<u32>,
    pub triangle_counts: Vec<u32>,
    /// Column-major instance transforms
    pub instance_matrices: Vec<[f32; 16]>,
}

/// Decoded i3d file
#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ParseSectorResult {
    pub version: u32,
    pub sector_id: u32,
    /// Node table, `node_ids[i]` has tree index `tree_indices[i]`
    pub node_ids: Vec<u64>,
    pub tree_indices: Vec<u32>,
    pub primitives: PrimitiveCollections,
    pub triangle_meshes: TriangleMeshTable,
    pub instanced_meshes: InstancedMeshTable,
}

/// Decoded ctm file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseCtmResult {
    pub indices: Vec<u32>,
    /// xyz triplets
    pub vertices: Vec<f32>,
    pub normals: Option<Vec<f32>>,
}

impl ParseCtmResult {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Shared, immutable mesh payload
pub type CtmMesh = Arc<ParseCtmResult>;

/// Number of f32 values per quad instance in an f3d buffer
pub const QUAD_STRIDE_FLOATS: usize = 23;

/// Byte size of one quad instance in an f3d buffer
pub const QUAD_STRIDE_BYTES: usize = QUAD_STRIDE_FLOATS * 4;

/// One quad instance, laid out as stored in f3d files
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct QuadInstance {
    pub offset: [f32; 3],
    pub tree_index: f32,
    pub normal: [f32; 3],
    /// Column-major instance transform
    pub matrix: [f32; 16],
}

/// Decoded f3d file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseQuadsResult {
    /// Interleaved instance data, `QUAD_STRIDE_FLOATS` per instance
    pub data: Vec<f32>,
    /// Instance indices per tree index
    pub tree_index_to_instances: HashMap<u32, Vec<u32>>,
}

impl ParseQuadsResult {
    pub fn instance_count(&self) -> usize {
        self.data.len() / QUAD_STRIDE_FLOATS
    }

    /// Typed view over the interleaved buffer
    pub fn instances(&self) -> &[QuadInstance] {
        let whole = self.instance_count() * QUAD_STRIDE_FLOATS;
        bytemuck::cast_slice(&self.data[..whole])
    }
}

/// Triangle meshes from one CTM file merged into a single draw
#[derive(Clone, Debug, PartialEq)]
pub struct TriangleMesh {
    pub file_id: u64,
    pub mesh: CtmMesh,
    /// Per-vertex tree index
    pub tree_indices: Vec<u32>,
    /// Per-vertex RGB
    pub colors: Vec<[u8; 3]>,
}

/// All instances drawing the same triangle range of a CTM file
#[derive(Clone, Debug, PartialEq)]
pub struct InstancedMesh {
    pub triangle_offset: u32,
    pub triangle_count: u32,
    pub instance_matrices: Vec<[f32; 16]>,
    pub tree_indices: Vec<u32>,
    pub colors: Vec<[u8; 4]>,
}

/// Instance batches drawing from one CTM file
#[derive(Clone, Debug, PartialEq)]
pub struct InstancedMeshFile {
    pub file_id: u64,
    pub mesh: CtmMesh,
    pub instances: Vec<InstancedMesh>,
}

/// Detailed sector ready to hand to a renderer
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectorGeometry {
    pub node_id_to_tree_index: HashMap<u64, u32>,
    pub tree_index_to_node_id: HashMap<u32, u64>,
    pub primitives: PrimitiveCollections,
    pub triangle_meshes: Vec<TriangleMesh>,
    pub instanced_meshes: Vec<InstancedMeshFile>,
}

impl SectorGeometry {
    /// Draw calls needed for the meshes (primitives excluded)
    pub fn mesh_draw_calls(&self) -> usize {
        self.triangle_meshes.len()
            + self.instanced_meshes.iter().map(|f| f.instances.len()).sum::<usize>()
    }
}
