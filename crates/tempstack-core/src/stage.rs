//! Lifecycle stages and the run state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Try-phase stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Scaffold the project and inject fixtures
    Provisioning,

    /// Dependency validation gate
    Validating,

    /// Install dependencies and build
    Building,

    /// Headless tests against the local dev server
    TestingLocal,

    /// Rewrite the manifest and deploy
    Deploying,

    /// Locate the deployed stack and wait for it to answer
    ResolvingEndpoint,

    /// Headless tests against the deployed endpoint
    TestingRemote,
}

impl Stage {
    /// All try-phase stages in order.
    pub const ALL: [Stage; 7] = [
        Stage::Provisioning,
        Stage::Validating,
        Stage::Building,
        Stage::TestingLocal,
        Stage::Deploying,
        Stage::ResolvingEndpoint,
        Stage::TestingRemote,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Provisioning => "provisioning",
            Stage::Validating => "validating",
            Stage::Building => "building",
            Stage::TestingLocal => "testing_local",
            Stage::Deploying => "deploying",
            Stage::ResolvingEndpoint => "resolving_endpoint",
            Stage::TestingRemote => "testing_remote",
        }
    }

    /// Stage that runs after this one, if any.
    pub fn next(&self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| s == self)?;
        Stage::ALL.get(idx + 1).copied()
    }

    /// Whether this stage is a gate (halts before any side-effecting stage).
    pub fn is_gate(&self) -> bool {
        matches!(self, Stage::Validating)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running { stage: Stage },
    Succeeded,
    Failed { stage: Stage, reason: String },
    Destroying,
    Done { exit_code: i32 },
}

impl RunState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Happy path: `Idle → Running(each stage in order) → Succeeded`.
    /// Any pre-terminal state may fail. Both outcomes lead to `Destroying`,
    /// which is the only way to reach `Done`.
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        match (self, next) {
            (RunState::Idle, RunState::Running { stage }) => *stage == Stage::Provisioning,
            (RunState::Running { stage: from }, RunState::Running { stage: to }) => {
                from.next() == Some(*to)
            }
            (RunState::Running { stage }, RunState::Succeeded) => *stage == Stage::TestingRemote,
            (RunState::Idle, RunState::Failed { .. }) => true,
            (RunState::Running { stage: from }, RunState::Failed { stage: to, .. }) => from == to,
            (RunState::Succeeded | RunState::Failed { .. }, RunState::Destroying) => true,
            (RunState::Destroying, RunState::Done { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running { stage } => write!(f, "{stage}"),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed { stage, .. } => write!(f, "failed({stage})"),
            RunState::Destroying => write!(f, "destroying"),
            RunState::Done { exit_code } => write!(f, "done({exit_code})"),
        }
    }
}

/// Records every state a run passes through.
#[derive(Debug, Clone)]
pub struct StateMachine {
    history: Vec<RunState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            history: vec![RunState::Idle],
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &RunState {
        // history always starts with Idle
        &self.history[self.history.len() - 1]
    }

    /// Move to `next`. Illegal transitions are refused and logged.
    pub fn transition(&mut self, next: RunState) -> bool {
        if !self.current().can_transition_to(&next) {
            tracing::error!(from = %self.current(), to = %next, "Refused illegal state transition");
            return false;
        }
        tracing::debug!(from = %self.current(), to = %next, "State transition");
        self.history.push(next);
        true
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RunState> {
        self.history
    }
}
