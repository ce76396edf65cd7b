//! arc-manifest: Architect manifest handling for disposable deployments
//!
//! Reads the `app.arc` manifest of an Architect project, rewrites its
//! `@app` section to the name of the current run, and derives the
//! CloudFormation stack name Architect will deploy that app under.

pub mod error;
pub mod logical_id;
pub mod manifest;

pub use error::ManifestError;
pub use logical_id::{stack_name, to_logical_id};
pub use manifest::{locate, read, set_app_name, ArcManifest, Section, MANIFEST_FILE_NAMES};

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;
