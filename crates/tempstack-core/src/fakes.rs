//! In-memory fakes for the lifecycle seams (testing only)
//!
//! Provides `RecordingProcessRunner`, `SkeletonScaffolder`,
//! `StaticReadinessProbe`, `FakeInventory` and `FakePipeline` so the
//! orchestrator and the stage adapters can be exercised without npm, Cypress,
//! Architect or AWS.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;

use crate::build::Build;
use crate::deploy::{ApiGateway, Deployer, DeploymentRecord, Inventory};
use crate::e2e::{EndToEndTests, TestTarget};
use crate::error::LifecycleError;
use crate::identity::RunIdentity;
use crate::process::{BackgroundProcess, CommandSpec, ProcessOutput, ProcessRunner};
use crate::provision::{ProjectSkeleton, Provision, ScaffoldRequest, Scaffolder};
use crate::readiness::ReadinessProbe;
use crate::stage::Stage;
use crate::validate::{DependencyValidator, ValidationResult};
use crate::Result;

// ---------------------------------------------------------------------------
// RecordingProcessRunner
// ---------------------------------------------------------------------------

/// Process runner that records every command and answers from a script.
///
/// Commands are matched by `CommandSpec::name`. Unscripted commands succeed
/// with empty output.
#[derive(Debug, Default)]
pub struct RecordingProcessRunner {
    calls: Mutex<Vec<CommandSpec>>,
    responses: Mutex<HashMap<String, ProcessOutput>>,
    stopped: Arc<AtomicUsize>,
}

impl RecordingProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the command `name` exit with `code`.
    pub fn fail_when(&self, name: &str, code: i32) {
        self.respond_with(name, ProcessOutput::failure(code));
    }

    pub fn respond_with(&self, name: &str, output: ProcessOutput) {
        self.responses
            .lock()
            .unwrap()
            .insert(name.to_string(), output);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.name == name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls_named(name).len()
    }

    /// Number of background processes stopped so far.
    pub fn stopped_background(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakeBackgroundProcess {
    stopped: Arc<AtomicUsize>,
}

#[async_trait]
impl BackgroundProcess for FakeBackgroundProcess {
    async fn stop(&mut self) -> Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for RecordingProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let scripted = self.responses.lock().unwrap().get(&spec.name).cloned();
        Ok(scripted.unwrap_or_else(|| ProcessOutput::success("")))
    }

    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        self.calls.lock().unwrap().push(spec.clone());
        Ok(Box::new(FakeBackgroundProcess {
            stopped: self.stopped.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// SkeletonScaffolder
// ---------------------------------------------------------------------------

/// `package.json` of a freshly scaffolded Remix `arc` project.
pub const REMIX_ARC_PACKAGE_JSON: &str = r#"{
  "private": true,
  "sideEffects": false,
  "scripts": {
    "build": "remix build",
    "dev": "remix build && arc sandbox",
    "start": "cross-env NODE_ENV=production arc sandbox"
  },
  "dependencies": {
    "@architect/functions": "^5.2.0",
    "@remix-run/architect": "1.6.5",
    "@remix-run/node": "1.6.5",
    "@remix-run/react": "1.6.5",
    "react": "^17.0.2",
    "react-dom": "^17.0.2"
  },
  "devDependencies": {
    "@remix-run/dev": "1.6.5",
    "typescript": "^4.6.4"
  }
}
"#;

/// `app.arc` of a freshly scaffolded Remix `arc` project.
pub const REMIX_APP_ARC: &str = "@app\nremix-architect-app\n\n@http\n/*\n  method any\n  src server\n\n@static\n\n# @aws\n# profile default\n# region us-east-1\n";

/// Scaffolder that writes a minimal Remix `arc` skeleton, or nothing at all.
#[derive(Debug)]
pub struct SkeletonScaffolder {
    write_files: bool,
    requests: Mutex<Vec<ScaffoldRequest>>,
}

impl Default for SkeletonScaffolder {
    fn default() -> Self {
        Self {
            write_files: true,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl SkeletonScaffolder {
    /// A scaffolder that "succeeds" without producing a project.
    pub fn empty() -> Self {
        Self {
            write_files: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ScaffoldRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scaffolder for SkeletonScaffolder {
    async fn scaffold(&self, request: &ScaffoldRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.write_files {
            return Ok(());
        }
        let dir = &request.project_dir;
        std::fs::create_dir_all(dir.join("app")).map_err(|e| LifecycleError::io(dir, e))?;
        for (name, content) in [
            ("package.json", REMIX_ARC_PACKAGE_JSON),
            ("app.arc", REMIX_APP_ARC),
            ("app/root.tsx", "export default function App() { return null }\n"),
        ] {
            let path = dir.join(name);
            std::fs::write(&path, content).map_err(|e| LifecycleError::io(&path, e))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticReadinessProbe
// ---------------------------------------------------------------------------

/// Readiness probe with a fixed answer that records the URLs it was asked.
#[derive(Debug, Default)]
pub struct StaticReadinessProbe {
    never_ready: bool,
    probed: Mutex<Vec<String>>,
}

impl StaticReadinessProbe {
    pub fn ready() -> Self {
        Self::default()
    }

    pub fn never() -> Self {
        Self {
            never_ready: true,
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadinessProbe for StaticReadinessProbe {
    async fn wait_ready(&self, url: &Url) -> Result<()> {
        self.probed.lock().unwrap().push(url.to_string());
        if self.never_ready {
            return Err(LifecycleError::EndpointNotReady {
                url: url.to_string(),
                attempts: 1,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeInventory
// ---------------------------------------------------------------------------

/// Inventory that returns nothing for the first `hidden_for` queries and
/// then a fixed list of gateways.
#[derive(Debug, Default)]
pub struct FakeInventory {
    gateways: Vec<ApiGateway>,
    hidden_for: usize,
    queries: AtomicUsize,
}

impl FakeInventory {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(gateways: Vec<ApiGateway>) -> Self {
        Self::appearing_after(0, gateways)
    }

    pub fn appearing_after(hidden_for: usize, gateways: Vec<ApiGateway>) -> Self {
        Self {
            gateways,
            hidden_for,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn list_api_gateways(&self) -> Result<Vec<ApiGateway>> {
        let seen = self.queries.fetch_add(1, Ordering::SeqCst);
        if seen < self.hidden_for {
            return Ok(Vec::new());
        }
        Ok(self.gateways.clone())
    }
}

// ---------------------------------------------------------------------------
// FakePipeline
// ---------------------------------------------------------------------------

/// Where a [`FakePipeline`] should break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The stage returns an error.
    FailAt(Stage),
    /// The validator rejects the project with these errors.
    Invalid(Vec<String>),
    /// The stage panics.
    PanicAt(Stage),
    /// The inventory never shows the stack.
    NotDeployed,
    /// Destroy returns an error.
    DestroyFails,
    /// Destroy panics.
    DestroyPanics,
}

/// One fake implementing every stage seam, with an ordered call log.
#[derive(Debug)]
pub struct FakePipeline {
    faults: Vec<Fault>,
    endpoint: Url,
    log: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
}

impl Default for FakePipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl FakePipeline {
    pub fn new(faults: Vec<Fault>) -> Self {
        Self {
            faults,
            endpoint: Url::parse("https://abc123.execute-api.us-west-2.amazonaws.com/")
                .unwrap(),
            log: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fault(fault: Fault) -> Self {
        Self::new(vec![fault])
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Calls in the order they were made, e.g. `["provision", "validate", ...]`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// App names passed to `destroy`, one entry per call.
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }

    fn check(&self, stage: Stage) -> Result<()> {
        if self.faults.contains(&Fault::PanicAt(stage)) {
            panic!("injected panic in {stage}");
        }
        if self.faults.contains(&Fault::FailAt(stage)) {
            return Err(LifecycleError::Process {
                command: format!("fake {stage}"),
                code: 1,
            });
        }
        Ok(())
    }

    /// Wire this fake into every seam of a [`crate::Components`].
    pub fn components(self: &Arc<Self>) -> crate::Components {
        crate::Components {
            provisioner: self.clone(),
            validator: self.clone(),
            builder: self.clone(),
            tests: self.clone(),
            deployer: self.clone(),
            probe: Arc::new(StaticReadinessProbe::ready()),
        }
    }
}

#[async_trait]
impl Provision for FakePipeline {
    async fn provision(&self, identity: &RunIdentity) -> Result<ProjectSkeleton> {
        self.record("provision");
        self.check(Stage::Provisioning)?;
        let dir = identity.project_dir.clone();
        Ok(ProjectSkeleton {
            fixtures_dir: dir.join("cypress"),
            fixture_config: dir.join("cypress.json"),
            package_json: dir.join("package.json"),
            project_dir: dir,
        })
    }
}

#[async_trait]
impl DependencyValidator for FakePipeline {
    async fn validate(&self, _project_dir: &Path) -> Result<ValidationResult> {
        self.record("validate");
        self.check(Stage::Validating)?;
        for fault in &self.faults {
            if let Fault::Invalid(errors) = fault {
                return Ok(ValidationResult::from_errors(errors.clone()));
            }
        }
        Ok(ValidationResult::passed())
    }
}

#[async_trait]
impl Build for FakePipeline {
    async fn build(&self, _project_dir: &Path) -> Result<()> {
        self.record("build");
        self.check(Stage::Building)
    }
}

#[async_trait]
impl EndToEndTests for FakePipeline {
    async fn run_tests(
        &self,
        _project_dir: &Path,
        target: TestTarget,
        _headless: bool,
        base_url: &Url,
    ) -> Result<()> {
        self.record(format!("test_{target}:{base_url}"));
        match target {
            TestTarget::Local => self.check(Stage::TestingLocal),
            TestTarget::Remote => self.check(Stage::TestingRemote),
        }
    }
}

#[async_trait]
impl Deployer for FakePipeline {
    async fn set_app_name(&self, project_dir: &Path, app_name: &str) -> Result<std::path::PathBuf> {
        self.record(format!("set_app_name:{app_name}"));
        Ok(project_dir.join("app.arc"))
    }

    async fn deploy(&self, _project_dir: &Path) -> Result<()> {
        self.record("deploy");
        self.check(Stage::Deploying)
    }

    async fn resolve_endpoint(&self, stack_id: &str) -> Result<DeploymentRecord> {
        self.record(format!("resolve:{stack_id}"));
        self.check(Stage::ResolvingEndpoint)?;
        if self.faults.contains(&Fault::NotDeployed) {
            return Err(LifecycleError::DeploymentNotFound {
                stack_id: stack_id.to_string(),
                attempts: 1,
            });
        }
        Ok(DeploymentRecord {
            endpoint: self.endpoint.clone(),
            name: stack_id.to_string(),
        })
    }

    async fn destroy(&self, app_name: &str, _project_dir: &Path) -> Result<()> {
        self.record("destroy");
        self.destroyed.lock().unwrap().push(app_name.to_string());
        if self.faults.contains(&Fault::DestroyPanics) {
            panic!("injected panic in destroy");
        }
        if self.faults.contains(&Fault::DestroyFails) {
            return Err(LifecycleError::Process {
                command: "fake destroy".to_string(),
                code: 1,
            });
        }
        Ok(())
    }
}
