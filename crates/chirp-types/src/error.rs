// ─────────────────────────────────────────────────────────────────────
// Chirp Kernel — Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use thiserror::Error;

/// Root error type for all Chirp Kernel failures.
///
/// Recoverable data-quality issues are not errors; they go to
/// [`crate::Diagnostics`].
#[derive(Error, Debug)]
pub enum ChirpError {
    /// A model or mode could not be constructed from its artifacts.
    #[error("load error: {0}")]
    Load(String),

    /// A specific artifact file is missing or malformed.
    #[error("artifact error in {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },

    /// Invalid input (parameter layout, spin range, mode, option).
    #[error("validation error: {0}")]
    Validation(String),

    /// Array shapes do not agree with the model contract.
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Numerical error (NaN/Inf or degenerate input in computation).
    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChirpError {
    pub fn artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Artifact {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type ChirpResult<T> = Result<T, ChirpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_display_names_path() {
        let err = ChirpError::artifact("/models/m0/22/times", "empty grid");
        let msg = err.to_string();
        assert!(msg.contains("/models/m0/22/times"));
        assert!(msg.contains("empty grid"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ChirpError = io.into();
        assert!(matches!(err, ChirpError::Io(_)));
    }
}
