//! Error types for tempstack-core

use crate::stage::Stage;
use arc_manifest::ManifestError;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Failure classes the orchestrator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Dependency validation rejected the project.
    Gate,
    /// An external command failed to run or exited non-zero.
    Process,
    /// The deployed stack could not be located.
    NotFound,
    /// Anything else (I/O, parsing, HTTP, panics).
    Other,
}

/// Errors raised by lifecycle stages
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Dependency validation rejected the project
    #[error("Dependency validation failed:\n{}", format_list(.errors))]
    Gate { errors: Vec<String> },

    /// External command exited non-zero
    #[error("Command `{command}` exited with code {code}")]
    Process { command: String, code: i32 },

    /// External command was killed after its timeout
    #[error("Command `{command}` timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    /// External command could not be started
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command has no program
    #[error("Command for {0} is empty")]
    EmptyCommand(String),

    /// Scaffolder reported success but left no project behind
    #[error("Scaffolding produced no project skeleton at {0}")]
    MissingSkeleton(PathBuf),

    /// Project directory is already populated
    #[error("Project directory {0} already exists and is not empty")]
    ProjectDirNotEmpty(PathBuf),

    /// Stack missing from the cloud inventory after deploy
    #[error("Deployment {stack_id} not found after {attempts} inventory lookup(s)")]
    DeploymentNotFound { stack_id: String, attempts: u32 },

    /// More than one inventory entry carries the stack name
    #[error("Deployment {stack_id} is ambiguous: {count} API gateways share the name")]
    AmbiguousDeployment { stack_id: String, count: usize },

    /// Inventory entry carries no usable endpoint
    #[error("Deployment {stack_id} has invalid endpoint {endpoint:?}")]
    InvalidEndpoint { stack_id: String, endpoint: String },

    /// Endpoint never answered the readiness probe
    #[error("Endpoint {url} not ready after {attempts} attempt(s)")]
    EndpointNotReady { url: String, attempts: u32 },

    /// Manifest read or rewrite failed
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// IO error on a specific path
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// A stage panicked
    #[error("Stage panicked: {0}")]
    Panicked(String),
}

impl LifecycleError {
    /// Attach a path to an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LifecycleError::Io {
            path: path.into(),
            source,
        }
    }

    /// Failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            LifecycleError::Gate { .. } => FailureKind::Gate,
            LifecycleError::Process { .. }
            | LifecycleError::Timeout { .. }
            | LifecycleError::Spawn { .. }
            | LifecycleError::EmptyCommand(_) => FailureKind::Process,
            LifecycleError::DeploymentNotFound { .. }
            | LifecycleError::AmbiguousDeployment { .. }
            | LifecycleError::InvalidEndpoint { .. } => FailureKind::NotFound,
            _ => FailureKind::Other,
        }
    }
}

impl From<reqwest::Error> for LifecycleError {
    fn from(err: reqwest::Error) -> Self {
        LifecycleError::Http(err.to_string())
    }
}

/// A failure captured by the orchestrator, tagged with the stage it came from.
#[derive(Error, Debug)]
#[error("Stage {stage} failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: LifecycleError,
}

impl StageFailure {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}

fn format_list(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
