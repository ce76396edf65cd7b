//! Run outcome and the JSON run report.

use crate::error::{FailureKind, LifecycleError, StageFailure};
use crate::identity::RunIdentity;
use crate::stage::{RunState, Stage};
use crate::Result;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use std::path::Path;

/// Status of a finished stage.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
}

/// Timing and result of one executed stage.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn passed(&self) -> bool {
        self.status == StageStatus::Passed
    }
}

/// What happened to the teardown.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum CleanupStatus {
    Destroyed,
    Failed(String),
}

impl CleanupStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, CleanupStatus::Destroyed)
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub identity: RunIdentity,

    /// 0 only when every try-phase stage passed.
    pub exit_code: i32,

    /// First failure of the try-phase, if any.
    pub failure: Option<StageFailure>,

    pub cleanup: CleanupStatus,

    /// Endpoint of the deployment, when it was resolved.
    pub endpoint: Option<Url>,

    pub stages: Vec<StageRecord>,

    /// Every state the run passed through, `Idle` to `Done`.
    pub history: Vec<RunState>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// The captured error, when the run failed.
    pub fn error(&self) -> Option<&LifecycleError> {
        self.failure.as_ref().map(|f| &f.error)
    }

    /// Serializable summary of the run.
    pub fn report(&self) -> RunReport {
        RunReport {
            app_name: self.identity.app_name.clone(),
            stack_id: self.identity.stack_id.clone(),
            project_dir: self.identity.project_dir.display().to_string(),
            environment: self.identity.environment.name().to_string(),
            exit_code: self.exit_code,
            failure: self.failure.as_ref().map(|f| FailureSummary {
                stage: f.stage,
                kind: f.kind(),
                message: f.error.to_string(),
            }),
            cleanup: self.cleanup.clone(),
            endpoint: self.endpoint.as_ref().map(Url::to_string),
            stages: self.stages.clone(),
            history: self.history.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: (self.finished_at - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        }
    }

    /// Write the JSON report to `path`.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.report())?;
        std::fs::write(path, json).map_err(|e| LifecycleError::io(path, e))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailureSummary {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

/// JSON form of a [`RunOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub app_name: String,
    pub stack_id: String,
    pub project_dir: String,
    pub environment: String,
    pub exit_code: i32,
    pub failure: Option<FailureSummary>,
    pub cleanup: CleanupStatus,
    pub endpoint: Option<String>,
    pub stages: Vec<StageRecord>,
    pub history: Vec<RunState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}
