//! Geometry decoding
//!
//! Three formats come off the wire: `i3d` (detailed sector index), `f3d`
//! (simple sector quads) and `ctm` (triangle meshes referenced by i3d).
//! Decoding is CPU bound and runs on [`ParserWorkerPool`]; merging a
//! decoded index with its meshes happens in [`consolidate`].

pub mod types;
pub mod ctm;
pub mod f3d;
pub mod i3d;
pub mod consolidate;
pub mod worker_pool;

pub use types::*;
pub use consolidate::consolidate_sector;
pub use worker_pool::{BinaryParser, ParserWorkerPool, SectorParser};

use thiserror::Error;

/// Errors raised while decoding geometry bytes. Never worth retrying.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Buffer of {len} bytes is not a multiple of the {stride} byte stride")]
    InvalidStride { len: usize, stride: usize },

    #[error("Unexpected end of data: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEof { offset: usize, needed: usize, available: usize },

    #[error("Expected magic '{expected}', found '{found}'")]
    BadMagic { expected: String, found: String },

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("Unsupported compression method '{0}'")]
    UnsupportedCompression(String),

    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error("Invalid archive: {0}")]
    Archive(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Missing peripheral file '{0}'")]
    MissingPeripheral(String),
}

/// Formats the parser understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryFormat {
    I3d,
    F3d,
    Ctm,
}

/// Name of the peripheral CTM file holding meshes for `file_id`
pub fn ctm_file_name(file_id: u64) -> String {
    format!("mesh_{}.ctm", file_id)
}
