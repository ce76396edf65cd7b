//! Lifecycle orchestration with guaranteed teardown.
//!
//! A run is split in two phases:
//!
//! - the **try-phase** executes the stages in order and stops at the first
//!   failure (including a panic inside a stage);
//! - the **always-phase** destroys the app exactly once, whatever the
//!   try-phase did, and never lets its own failure change the verdict of
//!   the try-phase (unless `fail_on_cleanup_error` is set and the try-phase
//!   succeeded).
//!
//! `run` has no early return between the two phases, so every path through
//! the try-phase reaches the teardown.

use crate::build::{Build, NpmBuild};
use crate::config::RunConfig;
use crate::deploy::{ArcDeployer, AwsCliInventory, Deployer, DeploymentRecord};
use crate::e2e::{CypressTests, EndToEndTests, TestTarget};
use crate::error::{LifecycleError, StageFailure};
use crate::identity::RunIdentity;
use crate::process::ProcessRunner;
use crate::provision::{CommandScaffolder, Provision, Provisioner};
use crate::readiness::{HttpReadinessProbe, ReadinessProbe};
use crate::report::{CleanupStatus, RunOutcome, StageRecord, StageStatus};
use crate::stage::{RunState, Stage, StateMachine};
use crate::validate::{DependencyValidator, PackageVersionValidator};
use crate::Result;
use chrono::Utc;
use futures::FutureExt;
use reqwest::Url;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The collaborators a run drives.
pub struct Components {
    pub provisioner: Arc<dyn Provision>,
    pub validator: Arc<dyn DependencyValidator>,
    pub builder: Arc<dyn Build>,
    pub tests: Arc<dyn EndToEndTests>,
    pub deployer: Arc<dyn Deployer>,
    pub probe: Arc<dyn ReadinessProbe>,
}

impl Components {
    /// Production wiring: scaffolder, npm, Cypress, Architect and the AWS
    /// CLI, all through `runner`.
    pub fn from_config(config: &RunConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        let probe: Arc<dyn ReadinessProbe> = Arc::new(HttpReadinessProbe::new(config.readiness)?);
        let scaffolder = Arc::new(CommandScaffolder::new(runner.clone(), config));
        let inventory = Arc::new(AwsCliInventory::new(runner.clone(), config));

        Ok(Self {
            provisioner: Arc::new(Provisioner::new(scaffolder, config)),
            validator: Arc::new(PackageVersionValidator::new(config)),
            builder: Arc::new(NpmBuild::new(runner.clone(), config)),
            tests: Arc::new(CypressTests::new(runner.clone(), probe.clone(), config)),
            deployer: Arc::new(ArcDeployer::new(runner, inventory, config)),
            probe,
        })
    }
}

/// Knobs of the orchestrator itself.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub headless: bool,
    pub local_base_url: Url,
    pub fail_on_cleanup_error: bool,
}

impl LifecycleSettings {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Ok(Self {
            headless: config.headless,
            local_base_url: config.local_base_url()?,
            fail_on_cleanup_error: config.fail_on_cleanup_error,
        })
    }
}

/// Sequences the stages of one disposable environment.
pub struct Lifecycle {
    components: Components,
    settings: LifecycleSettings,
}

/// Mutable bookkeeping threaded through the try-phase.
#[derive(Debug, Default)]
struct Tracker {
    machine: StateMachine,
    stages: Vec<StageRecord>,
    endpoint: Option<Url>,
}

impl Tracker {
    fn current_stage(&self) -> Option<Stage> {
        match self.machine.current() {
            RunState::Running { stage } => Some(*stage),
            _ => None,
        }
    }

    async fn step<T, F>(&mut self, stage: Stage, work: F) -> std::result::Result<T, StageFailure>
    where
        F: Future<Output = Result<T>>,
    {
        self.machine.transition(RunState::Running { stage });
        info!(stage = %stage, "Stage started");
        let start = Instant::now();

        let result = work.await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                info!(stage = %stage, duration_ms, "Stage passed");
                self.stages.push(StageRecord {
                    stage,
                    status: StageStatus::Passed,
                    duration_ms,
                    error: None,
                });
                Ok(value)
            }
            Err(error) => {
                self.stages.push(StageRecord {
                    stage,
                    status: StageStatus::Failed,
                    duration_ms,
                    error: Some(error.to_string()),
                });
                Err(StageFailure { stage, error })
            }
        }
    }
}

impl Lifecycle {
    pub fn new(components: Components, settings: LifecycleSettings) -> Self {
        Self {
            components,
            settings,
        }
    }

    /// Production lifecycle for `config`.
    pub fn from_config(config: &RunConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        Ok(Self::new(
            Components::from_config(config, runner)?,
            LifecycleSettings::from_config(config)?,
        ))
    }

    /// Execute the run. Never fails: every error ends up in the outcome,
    /// and `destroy` is invoked exactly once.
    pub async fn run(&self, identity: &RunIdentity) -> RunOutcome {
        let started_at = Utc::now();
        info!(
            app = %identity.app_name,
            stack = %identity.stack_id,
            dir = %identity.project_dir.display(),
            "Starting disposable run"
        );

        let mut tracker = Tracker::default();

        let caught = AssertUnwindSafe(self.try_phase(identity, &mut tracker))
            .catch_unwind()
            .await;
        let failure = match caught {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure),
            Err(payload) => {
                let stage = tracker.current_stage().unwrap_or(Stage::Provisioning);
                let message = panic_message(payload.as_ref());
                tracker.stages.push(StageRecord {
                    stage,
                    status: StageStatus::Failed,
                    duration_ms: 0,
                    error: Some(format!("panicked: {message}")),
                });
                Some(StageFailure {
                    stage,
                    error: LifecycleError::Panicked(message),
                })
            }
        };

        match &failure {
            None => {
                tracker.machine.transition(RunState::Succeeded);
                info!(app = %identity.app_name, "All stages passed");
            }
            Some(failure) => {
                error!(
                    stage = %failure.stage,
                    kind = ?failure.kind(),
                    error = %failure.error,
                    "Run failed"
                );
                tracker.machine.transition(RunState::Failed {
                    stage: failure.stage,
                    reason: failure.error.to_string(),
                });
            }
        }

        // Always-phase.
        tracker.machine.transition(RunState::Destroying);
        let cleanup = self.cleanup(identity).await;

        let exit_code = match (&failure, &cleanup) {
            (Some(_), _) => 1,
            (None, CleanupStatus::Failed(_)) if self.settings.fail_on_cleanup_error => 1,
            _ => 0,
        };
        tracker.machine.transition(RunState::Done { exit_code });
        info!(app = %identity.app_name, exit_code, "Run finished");

        RunOutcome {
            identity: identity.clone(),
            exit_code,
            failure,
            cleanup,
            endpoint: tracker.endpoint,
            stages: tracker.stages,
            history: tracker.machine.into_history(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn try_phase(
        &self,
        identity: &RunIdentity,
        tracker: &mut Tracker,
    ) -> std::result::Result<(), StageFailure> {
        let c = &self.components;
        let headless = self.settings.headless;

        let skeleton = tracker
            .step(Stage::Provisioning, c.provisioner.provision(identity))
            .await?;
        let project_dir = skeleton.project_dir.as_path();

        tracker
            .step(Stage::Validating, async {
                let result = c.validator.validate(project_dir).await?;
                if result.valid {
                    return Ok::<_, LifecycleError>(());
                }
                for problem in &result.errors {
                    error!(problem = %problem, "Dependency validation error");
                }
                Err(LifecycleError::Gate {
                    errors: result.errors,
                })
            })
            .await?;

        tracker
            .step(Stage::Building, c.builder.build(project_dir))
            .await?;

        tracker
            .step(
                Stage::TestingLocal,
                c.tests.run_tests(
                    project_dir,
                    TestTarget::Local,
                    headless,
                    &self.settings.local_base_url,
                ),
            )
            .await?;

        tracker
            .step(Stage::Deploying, async {
                c.deployer
                    .set_app_name(project_dir, &identity.app_name)
                    .await?;
                c.deployer.deploy(project_dir).await
            })
            .await?;

        let record: DeploymentRecord = tracker
            .step(Stage::ResolvingEndpoint, async {
                let record = c.deployer.resolve_endpoint(&identity.stack_id).await?;
                c.probe.wait_ready(&record.endpoint).await?;
                Ok::<_, LifecycleError>(record)
            })
            .await?;
        tracker.endpoint = Some(record.endpoint.clone());

        tracker
            .step(
                Stage::TestingRemote,
                c.tests
                    .run_tests(project_dir, TestTarget::Remote, headless, &record.endpoint),
            )
            .await?;

        Ok(())
    }

    async fn cleanup(&self, identity: &RunIdentity) -> CleanupStatus {
        let destroy = self
            .components
            .deployer
            .destroy(&identity.app_name, &identity.project_dir);

        match AssertUnwindSafe(destroy).catch_unwind().await {
            Ok(Ok(())) => {
                info!(app = %identity.app_name, "App destroyed");
                CleanupStatus::Destroyed
            }
            Ok(Err(e)) => {
                error!(app = %identity.app_name, error = %e, "Cleanup failed; resources may remain");
                CleanupStatus::Failed(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(app = %identity.app_name, panic = %message, "Cleanup panicked");
                CleanupStatus::Failed(format!("panicked: {message}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
