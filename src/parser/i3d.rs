//! Detailed sector index files (rkyv archive + LZ4)

use super::ParseError;
use super::types::{ArchivedParseSectorResult, ParseSectorResult};

/// Current i3d format version
pub const I3D_VERSION: u32 = 1;

/// Serialize a sector index to compressed bytes
pub fn encode_sector(sector: &ParseSectorResult) -> Result<Vec<u8>, ParseError> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(sector)
        .map_err(|e| ParseError::Archive(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decode an i3d file and check its tables are consistent.
pub fn parse_sector(bytes: &[u8]) -> Result<ParseSectorResult, ParseError> {
    let decompressed = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| ParseError::Decompress(e.to_string()))?;

    // Archive access needs an aligned buffer
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(decompressed.len());
    aligned.extend_from_slice(&decompressed);

    let archived = rkyv::access::<ArchivedParseSectorResult, rkyv::rancor::Error>(&aligned)
        .map_err(|e| ParseError::Archive(e.to_string()))?;
    let sector = rkyv::deserialize::<ParseSectorResult, rkyv::rancor::Error>(archived)
        .map_err(|e| ParseError::Archive(e.to_string()))?;

    if sector.version != I3D_VERSION {
        return Err(ParseError::UnsupportedVersion(sector.version));
    }
    validate(&sector)?;
    Ok(sector)
}

fn validate(sector: &ParseSectorResult) -> Result<(), ParseError> {
    let mismatch = |table: &str| -> Result<(), ParseError> {
        Err(ParseError::InvalidGeometry(format!(
            "column lengths of {} table differ in sector {}", table, sector.sector_id
        )))
    };

    if sector.node_ids.len() != sector.tree_indices.len() {
        return mismatch("node");
    }

    let t = &sector.triangle_meshes;
    let n = t.file_ids.len();
    if t.tree_indices.len() != n || t.colors.len() != n || t.triangle_counts.len() != n {
        return mismatch("triangle mesh");
    }

    let m = &sector.instanced_meshes;
    let n = m.file_ids.len();
    if m.tree_indices.len() != n
        || m.colors.len() != n
        || m.triangle_offsets.len() != n
        || m.triangle_counts.len() != n
        || m.instance_matrices.len() != n
    {
        return mismatch("instanced mesh");
    }
    Ok(())
}
