//! Error types for arc-manifest

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or rewriting an Architect manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    /// No manifest file in the project directory
    #[error("No Architect manifest (app.arc or .arc) found in {0}")]
    NotFound(PathBuf),

    /// App name cannot be written as a single manifest value
    #[error("Invalid app name {0:?}: must be non-empty and contain no whitespace or '#'")]
    InvalidAppName(String),

    /// Manifest is not valid UTF-8
    #[error("Manifest {0} is not valid UTF-8")]
    Encoding(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Atomic replace of the manifest failed
    #[error("Failed to replace manifest {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
