//! Merging a decoded sector index with its peripheral meshes

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use super::{ctm_file_name, ParseError};
use super::types::{
    CtmMesh, InstancedMesh, InstancedMeshFile, InstancedMeshTable, ParseSectorResult,
    SectorGeometry, TriangleMesh, TriangleMeshTable,
};

/// Stable grouping: keys in order of first appearance, each with the
/// positions at which it occurs.
pub fn group_by_key<K, I>(keys: I) -> Vec<(K, Vec<usize>)>
where
    K: Eq + Hash + Copy,
    I: IntoIterator<Item = K>,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<usize>)> = Vec::new();
    for (i, key) in keys.into_iter().enumerate() {
        let slot = *slots.entry(key).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(i);
    }
    groups
}

fn lookup_mesh(ctm_files: &HashMap<String, CtmMesh>, file_id: u64) -> Result<CtmMesh, ParseError> {
    let name = ctm_file_name(file_id);
    ctm_files
        .get(&name)
        .map(Arc::clone)
        .ok_or(ParseError::MissingPeripheral(name))
}

/// Merge a decoded i3d file with the CTM files it references.
pub fn consolidate_sector(
    sector: ParseSectorResult,
    ctm_files: &HashMap<String, CtmMesh>,
) -> Result<SectorGeometry, ParseError> {
    let triangle_meshes = merge_triangle_meshes(&sector.triangle_meshes, ctm_files)?;
    let instanced_meshes = merge_instanced_meshes(&sector.instanced_meshes, ctm_files)?;

    let node_id_to_tree_index = sector.node_ids.iter().copied()
        .zip(sector.tree_indices.iter().copied())
        .collect();
    let tree_index_to_node_id = sector.tree_indices.iter().copied()
        .zip(sector.node_ids.iter().copied())
        .collect();

    Ok(SectorGeometry {
        node_id_to_tree_index,
        tree_index_to_node_id,
        primitives: sector.primitives,
        triangle_meshes,
        instanced_meshes,
    })
}

/// One merged mesh per file; tree index and color of each source mesh are
/// written to every vertex of its triangle range.
fn merge_triangle_meshes(
    table: &TriangleMeshTable,
    ctm_files: &HashMap<String, CtmMesh>,
) -> Result<Vec<TriangleMesh>, ParseError> {
    let mut merged = Vec::new();

    for (file_id, rows) in group_by_key(table.file_ids.iter().copied()) {
        let mesh = lookup_mesh(ctm_files, file_id)?;
        let vertex_count = mesh.vertex_count();
        let mut tree_indices = vec![0u32; vertex_count];
        let mut colors = vec![[0u8; 3]; vertex_count];

        let mut triangle_offset = 0usize;
        for row in rows {
            let count = table.triangle_counts[row] as usize;
            let end = triangle_offset + count;
            if end > mesh.triangle_count() {
                return Err(ParseError::InvalidGeometry(format!(
                    "{} references {} triangles, file has {}",
                    ctm_file_name(file_id), end, mesh.triangle_count()
                )));
            }

            let [r, g, b, _] = table.colors[row];
            for &v in &mesh.indices[triangle_offset * 3..end * 3] {
                tree_indices[v as usize] = table.tree_indices[row];
                colors[v as usize] = [r, g, b];
            }
            triangle_offset = end;
        }

        merged.push(TriangleMesh { file_id, mesh, tree_indices, colors });
    }
    Ok(merged)
}

/// Per file, one instance batch per distinct triangle offset.
fn merge_instanced_meshes(
    table: &InstancedMeshTable,
    ctm_files: &HashMap<String, CtmMesh>,
) -> Result<Vec<InstancedMeshFile>, ParseError> {
    let mut merged = Vec::new();

    for (file_id, rows) in group_by_key(table.file_ids.iter().copied()) {
        let mesh = lookup_mesh(ctm_files, file_id)?;
        let by_offset = group_by_key(rows.iter().map(|&row| table.triangle_offsets[row]));

        let mut instances = Vec::with_capacity(by_offset.len());
        for (triangle_offset, positions) in by_offset {
            // Instances sharing an offset share the triangle count
            let first = rows[positions[0]];
            let triangle_count = table.triangle_counts[first];
            if triangle_offset as usize + triangle_count as usize > mesh.triangle_count() {
                return Err(ParseError::InvalidGeometry(format!(
                    "instances of {} exceed its {} triangles",
                    ctm_file_name(file_id), mesh.triangle_count()
                )));
            }

            let rows_here: Vec<usize> = positions.iter().map(|&p| rows[p]).collect();
            instances.push(InstancedMesh {
                triangle_offset,
                triangle_count,
                instance_matrices: rows_here.iter().map(|&r| table.instance_matrices[r]).collect(),
                tree_indices: rows_here.iter().map(|&r| table.tree_indices[r]).collect(),
                colors: rows_here.iter().map(|&r| table.colors[r]).collect(),
            });
        }

        merged.push(InstancedMeshFile { file_id, mesh, instances });
    }
    Ok(merged)
}
