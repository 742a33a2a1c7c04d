//! Math re-exports and the crate-wide `Result`

pub use glam::{Mat4, Vec3, Vec4};

/// Result carrying the crate [`Error`](crate::core::error::Error)
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
