//! Integration tests for the lifecycle orchestrator.
//!
//! The first group drives `Lifecycle` through `FakePipeline` to inject a
//! failure or a panic at every stage. The second group wires the real stage
//! adapters to a recording process runner and an in-memory inventory.

use std::path::Path;
use std::sync::Arc;

use reqwest::Url;
use tempfile::tempdir;
use tempstack_core::config::FixturesConfig;
use tempstack_core::fakes::{
    FakeInventory, FakePipeline, Fault, RecordingProcessRunner, SkeletonScaffolder,
    StaticReadinessProbe,
};
use tempstack_core::{
    ApiGateway, ArcDeployer, CleanupStatus, Components, CypressTests, Environment, FailureKind,
    Lifecycle, LifecycleError, LifecycleSettings, NpmBuild, PackageVersionValidator, PollConfig,
    Provisioner, RunConfig, RunIdentity, RunState, Stage, StageStatus,
};

fn settings(fail_on_cleanup_error: bool) -> LifecycleSettings {
    LifecycleSettings {
        headless: true,
        local_base_url: Url::parse("http://localhost:3333").unwrap(),
        fail_on_cleanup_error,
    }
}

fn identity() -> RunIdentity {
    RunIdentity::new("tempstack-arc-1a2b3c4", Environment::Staging, Path::new("/tmp/runs"))
}

async fn run_with(faults: Vec<Fault>, fail_on_cleanup_error: bool) -> (Arc<FakePipeline>, tempstack_core::RunOutcome) {
    let pipeline = Arc::new(FakePipeline::new(faults));
    let lifecycle = Lifecycle::new(pipeline.components(), settings(fail_on_cleanup_error));
    let outcome = lifecycle.run(&identity()).await;
    (pipeline, outcome)
}

/// Test: every stage passes, destroy runs once, exit code is 0
#[tokio::test]
async fn test_successful_run() {
    let (pipeline, outcome) = run_with(Vec::new(), false).await;

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.cleanup, CleanupStatus::Destroyed);
    assert_eq!(pipeline.destroyed(), vec!["tempstack-arc-1a2b3c4".to_string()]);
    assert_eq!(outcome.endpoint.as_ref(), Some(pipeline.endpoint()));
    assert_eq!(outcome.stages.len(), Stage::ALL.len());
    assert!(outcome.stages.iter().all(|s| s.passed()));

    assert_eq!(
        pipeline.log(),
        vec![
            "provision".to_string(),
            "validate".to_string(),
            "build".to_string(),
            "test_local:http://localhost:3333/".to_string(),
            "set_app_name:tempstack-arc-1a2b3c4".to_string(),
            "deploy".to_string(),
            "resolve:TempstackArc1a2b3c4Staging".to_string(),
            format!("test_remote:{}", pipeline.endpoint()),
            "destroy".to_string(),
        ]
    );
}

/// Test: the state history walks Idle, every stage, Succeeded, Destroying, Done
#[tokio::test]
async fn test_state_history_on_success() {
    let (_, outcome) = run_with(Vec::new(), false).await;

    let mut expected = vec![RunState::Idle];
    expected.extend(Stage::ALL.iter().map(|&stage| RunState::Running { stage }));
    expected.push(RunState::Succeeded);
    expected.push(RunState::Destroying);
    expected.push(RunState::Done { exit_code: 0 });
    assert_eq!(outcome.history, expected);
}

/// Test: a failure at any stage stops the try-phase, destroys once, exits 1
#[tokio::test]
async fn test_failure_at_each_stage_destroys_once() {
    for (index, &stage) in Stage::ALL.iter().enumerate() {
        let (pipeline, outcome) = run_with(vec![Fault::FailAt(stage)], false).await;

        assert_eq!(outcome.exit_code, 1, "stage {stage}");
        assert_eq!(pipeline.destroyed().len(), 1, "stage {stage}");
        let failure = outcome.failure.as_ref().expect("failure recorded");
        assert_eq!(failure.stage, stage);
        assert_eq!(failure.kind(), FailureKind::Process);

        assert_eq!(outcome.stages.len(), index + 1, "stage {stage}");
        assert_eq!(outcome.stages[index].status, StageStatus::Failed);
        assert_eq!(pipeline.log().last().map(String::as_str), Some("destroy"));

        let tail = &outcome.history[outcome.history.len() - 3..];
        assert!(matches!(tail[0], RunState::Failed { stage: s, .. } if s == stage));
        assert_eq!(tail[1], RunState::Destroying);
        assert_eq!(tail[2], RunState::Done { exit_code: 1 });
    }
}

/// Test: a rejected validation halts before build and still destroys
#[tokio::test]
async fn test_gate_failure_skips_build() {
    let errors = vec!["missing peer dependency react-dom".to_string()];
    let (pipeline, outcome) = run_with(vec![Fault::Invalid(errors.clone())], false).await;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(pipeline.destroyed().len(), 1);
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Validating);
    assert_eq!(failure.kind(), FailureKind::Gate);
    match &failure.error {
        LifecycleError::Gate { errors: got } => assert_eq!(got, &errors),
        other => panic!("expected gate error, got {other:?}"),
    }
    assert_eq!(pipeline.log(), vec!["provision", "validate", "destroy"]);
}

/// Test: a panic inside a stage is captured as that stage's failure
#[tokio::test]
async fn test_panic_in_stage_still_destroys() {
    let (pipeline, outcome) = run_with(vec![Fault::PanicAt(Stage::Building)], false).await;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(pipeline.destroyed().len(), 1);
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Building);
    assert!(matches!(&failure.error, LifecycleError::Panicked(msg) if msg.contains("building")));
    assert_eq!(outcome.stages.last().unwrap().status, StageStatus::Failed);
}

/// Test: a stack that never appears fails endpoint resolution
#[tokio::test]
async fn test_missing_deployment_is_not_found() {
    let (pipeline, outcome) = run_with(vec![Fault::NotDeployed], false).await;

    assert_eq!(outcome.exit_code, 1);
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::ResolvingEndpoint);
    assert_eq!(failure.kind(), FailureKind::NotFound);
    assert!(outcome.endpoint.is_none());
    assert_eq!(pipeline.destroyed().len(), 1);
}

/// Test: a failed teardown does not change a passing verdict by default
#[tokio::test]
async fn test_cleanup_failure_keeps_exit_code() {
    let (pipeline, outcome) = run_with(vec![Fault::DestroyFails], false).await;

    assert_eq!(outcome.exit_code, 0);
    assert!(matches!(outcome.cleanup, CleanupStatus::Failed(_)));
    assert_eq!(pipeline.destroyed().len(), 1);
}

/// Test: opting in turns a failed teardown into a failed run
#[tokio::test]
async fn test_cleanup_failure_with_opt_in() {
    let (_, outcome) = run_with(vec![Fault::DestroyFails], true).await;

    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.history.last(), Some(&RunState::Done { exit_code: 1 }));
}

/// Test: the try-phase failure stays the reported cause when teardown also fails
#[tokio::test]
async fn test_cleanup_failure_does_not_mask_stage_failure() {
    let (pipeline, outcome) = run_with(
        vec![Fault::FailAt(Stage::Deploying), Fault::DestroyFails],
        true,
    )
    .await;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.failure.as_ref().unwrap().stage, Stage::Deploying);
    assert!(matches!(outcome.cleanup, CleanupStatus::Failed(_)));
    assert_eq!(pipeline.destroyed().len(), 1);
}

/// Test: a panicking teardown is contained
#[tokio::test]
async fn test_cleanup_panic_is_contained() {
    let (pipeline, outcome) = run_with(vec![Fault::DestroyPanics], false).await;

    assert_eq!(outcome.exit_code, 0);
    assert!(matches!(&outcome.cleanup, CleanupStatus::Failed(msg) if msg.starts_with("panicked")));
    assert_eq!(pipeline.destroyed().len(), 1);
}

/// Test: the JSON report carries the failure and the cleanup status
#[tokio::test]
async fn test_report_for_failed_run() {
    let (_, outcome) = run_with(vec![Fault::FailAt(Stage::TestingLocal)], false).await;

    let report = serde_json::to_value(outcome.report()).unwrap();
    assert_eq!(report["exit_code"], 1);
    assert_eq!(report["failure"]["stage"], "testing_local");
    assert_eq!(report["cleanup"]["status"], "destroyed");
    assert_eq!(report["stack_id"], "TempstackArc1a2b3c4Staging");
}

// ---------------------------------------------------------------------------
// Real adapters
// ---------------------------------------------------------------------------

const ENDPOINT: &str = "https://abc123.execute-api.us-west-2.amazonaws.com";

struct Harness {
    _root: tempfile::TempDir,
    config: RunConfig,
    runner: Arc<RecordingProcessRunner>,
    inventory: Arc<FakeInventory>,
    probe: Arc<StaticReadinessProbe>,
}

impl Harness {
    fn new(gateways: Vec<ApiGateway>) -> Self {
        let root = tempdir().unwrap();
        let fixtures_dir = root.path().join("cypress");
        std::fs::create_dir_all(fixtures_dir.join("integration")).unwrap();
        std::fs::write(
            fixtures_dir.join("integration/home.spec.ts"),
            "it('renders', () => cy.visit('/'))",
        )
        .unwrap();
        let fixture_config = root.path().join("cypress.json");
        std::fs::write(&fixture_config, r#"{"video": false}"#).unwrap();

        let config = RunConfig {
            run_suffix: Some("1a2b3c4".to_string()),
            work_dir: root.path().join("runs"),
            fixtures: FixturesConfig {
                dir: fixtures_dir,
                config_file: fixture_config,
            },
            resolve: PollConfig::new(2, 0),
            ..RunConfig::default()
        };

        Self {
            _root: root,
            config,
            runner: Arc::new(RecordingProcessRunner::new()),
            inventory: Arc::new(FakeInventory::with(gateways)),
            probe: Arc::new(StaticReadinessProbe::ready()),
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        let runner = self.runner.clone();
        let components = Components {
            provisioner: Arc::new(Provisioner::new(
                Arc::new(SkeletonScaffolder::default()),
                &self.config,
            )),
            validator: Arc::new(PackageVersionValidator::new(&self.config)),
            builder: Arc::new(NpmBuild::new(runner.clone(), &self.config)),
            tests: Arc::new(CypressTests::new(
                runner.clone(),
                self.probe.clone(),
                &self.config,
            )),
            deployer: Arc::new(ArcDeployer::new(
                runner,
                self.inventory.clone(),
                &self.config,
            )),
            probe: self.probe.clone(),
        };
        Lifecycle::new(components, LifecycleSettings::from_config(&self.config).unwrap())
    }
}

fn live_gateway(name: &str) -> ApiGateway {
    ApiGateway {
        name: name.to_string(),
        api_endpoint: Some(ENDPOINT.to_string()),
        api_id: Some("abc123".to_string()),
    }
}

/// Test: the arc template goes end to end and is torn down by app name
#[tokio::test]
async fn test_arc_template_end_to_end() {
    let harness = Harness::new(vec![
        live_gateway("SomeoneElseStaging"),
        live_gateway("TempstackArc1a2b3c4Staging"),
    ]);
    let identity = RunIdentity::generate(&harness.config);
    assert_eq!(identity.stack_id, "TempstackArc1a2b3c4Staging");

    let outcome = harness.lifecycle().run(&identity).await;

    assert_eq!(outcome.exit_code, 0, "failure: {:?}", outcome.failure);
    assert_eq!(outcome.endpoint.as_ref().map(Url::as_str), Some("https://abc123.execute-api.us-west-2.amazonaws.com/"));

    let manifest = arc_manifest::read(&identity.project_dir.join("app.arc")).unwrap();
    assert_eq!(manifest.app_name(), Some("tempstack-arc-1a2b3c4"));
    assert!(identity.project_dir.join("cypress/integration/home.spec.ts").is_file());

    let runner = &harness.runner;
    assert_eq!(runner.count("install"), 1);
    assert_eq!(runner.count("build"), 1);
    assert_eq!(runner.count("dev-server"), 1);
    assert_eq!(runner.stopped_background(), 1);
    assert_eq!(runner.count("e2e"), 2);
    assert_eq!(runner.count("deploy"), 1);

    let remote = &runner.calls_named("e2e")[1];
    assert_eq!(
        remote.env.get("CYPRESS_BASE_URL").map(String::as_str),
        Some("https://abc123.execute-api.us-west-2.amazonaws.com/")
    );

    let destroys = runner.calls_named("destroy");
    assert_eq!(destroys.len(), 1);
    assert_eq!(
        destroys[0].command_line(),
        "npx arc destroy --app tempstack-arc-1a2b3c4 --force"
    );
}

/// Test: a failed deploy still tears the app down
#[tokio::test]
async fn test_failed_deploy_is_destroyed() {
    let harness = Harness::new(Vec::new());
    harness.runner.fail_when("deploy", 1);
    let identity = RunIdentity::generate(&harness.config);

    let outcome = harness.lifecycle().run(&identity).await;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.failure.as_ref().unwrap().stage, Stage::Deploying);
    assert_eq!(harness.inventory.queries(), 0);
    assert_eq!(harness.runner.count("destroy"), 1);
}

/// Test: a stack that never shows up fails after the polling window
#[tokio::test]
async fn test_unresolved_stack_is_destroyed() {
    let harness = Harness::new(vec![live_gateway("SomeoneElseStaging")]);
    let identity = RunIdentity::generate(&harness.config);

    let outcome = harness.lifecycle().run(&identity).await;

    assert_eq!(outcome.exit_code, 1);
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::ResolvingEndpoint);
    assert!(matches!(
        failure.error,
        LifecycleError::DeploymentNotFound { attempts: 2, .. }
    ));
    assert_eq!(harness.inventory.queries(), 2);
    assert_eq!(harness.runner.count("e2e"), 1);
    assert_eq!(harness.runner.count("destroy"), 1);
}

/// Test: an occupied project directory fails provisioning before scaffolding
#[tokio::test]
async fn test_occupied_project_dir_fails_provisioning() {
    let harness = Harness::new(Vec::new());
    let identity = RunIdentity::generate(&harness.config);
    std::fs::create_dir_all(&identity.project_dir).unwrap();
    std::fs::write(identity.project_dir.join("keep.txt"), "mine").unwrap();

    let outcome = harness.lifecycle().run(&identity).await;

    assert_eq!(outcome.exit_code, 1);
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Provisioning);
    assert!(matches!(failure.error, LifecycleError::ProjectDirNotEmpty(_)));
    assert_eq!(harness.runner.count("build"), 0);
    assert_eq!(harness.runner.count("destroy"), 1);
}
