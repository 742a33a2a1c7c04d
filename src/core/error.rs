//! Error types for the sector streaming engine

use thiserror::Error;

use crate::parser::ParseError;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Network/data-source failure. Retried before being surfaced.
    #[error("Fetch of '{file}' failed: {message}")]
    Fetch { file: String, message: String },

    /// Corrupt or unexpected geometry bytes. Never retried.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Model (or camera) transform cannot be inverted.
    #[error("Transform of model '{0}' is not invertible")]
    NonInvertibleTransform(String),

    /// Scene descriptor is structurally invalid.
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// Unexpected failure in the scheduling stream. Restarts the stream.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Request abandoned because a newer tick superseded it.
    #[error("Request superseded by a newer update")]
    Superseded,

    /// Model was never registered with the manager.
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Configuration errors cannot succeed on retry.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::NonInvertibleTransform(_) | Error::InvalidScene(_))
    }

    /// Transient errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let fetch = Error::Fetch { file: "a.i3d".into(), message: "timeout".into() };
        assert!(fetch.is_transient());
        assert!(!fetch.is_configuration());

        let config = Error::NonInvertibleTransform("model".into());
        assert!(config.is_configuration());
        assert!(!config.is_transient());

        let parse = Error::from(ParseError::InvalidStride { len: 10, stride: 92 });
        assert!(!parse.is_transient());
        assert!(!parse.is_configuration());
    }
}
