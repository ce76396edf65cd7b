//! End-to-end test runner adapter.

use crate::config::RunConfig;
use crate::process::{run_checked, CommandSpec, ProcessRunner};
use crate::readiness::ReadinessProbe;
use crate::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the suite points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestTarget {
    /// A dev server started from the project for the duration of the run
    Local,
    /// An already deployed endpoint
    Remote,
}

impl std::fmt::Display for TestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestTarget::Local => f.write_str("local"),
            TestTarget::Remote => f.write_str("remote"),
        }
    }
}

/// Drives the browser test suite. Invocations share no state.
#[async_trait]
pub trait EndToEndTests: Send + Sync {
    async fn run_tests(
        &self,
        project_dir: &Path,
        target: TestTarget,
        headless: bool,
        base_url: &Url,
    ) -> Result<()>;
}

/// Cypress via `npx cypress run`.
pub struct CypressTests {
    runner: Arc<dyn ProcessRunner>,
    probe: Arc<dyn ReadinessProbe>,
    npm: String,
    npx: String,
    test_runner: String,
    timeout_secs: u64,
    env: BTreeMap<String, String>,
}

impl CypressTests {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        probe: Arc<dyn ReadinessProbe>,
        config: &RunConfig,
    ) -> Self {
        Self {
            runner,
            probe,
            npm: config.tools.npm.clone(),
            npx: config.tools.npx.clone(),
            test_runner: config.tools.test_runner.clone(),
            timeout_secs: config.timeouts.tests_secs,
            env: config.env.clone(),
        }
    }

    pub fn suite_command(&self, project_dir: &Path, headless: bool, base_url: &Url) -> CommandSpec {
        CommandSpec::new("e2e", &self.npx)
            .args([self.test_runner.as_str(), "run"])
            .arg(if headless { "--headless" } else { "--headed" })
            .arg("--config")
            .arg(format!("baseUrl={base_url}"))
            .current_dir(project_dir)
            .envs(&self.env)
            .env("CYPRESS_BASE_URL", base_url.as_str())
            .timeout_secs(self.timeout_secs)
    }

    pub fn dev_server_command(&self, project_dir: &Path, base_url: &Url) -> CommandSpec {
        let mut spec = CommandSpec::new("dev-server", &self.npm)
            .args(["run", "dev"])
            .current_dir(project_dir)
            .envs(&self.env);
        if let Some(port) = base_url.port_or_known_default() {
            spec = spec.env("PORT", &port.to_string());
        }
        spec
    }

    async fn run_local(&self, project_dir: &Path, headless: bool, base_url: &Url) -> Result<()> {
        let mut server = self
            .runner
            .spawn(&self.dev_server_command(project_dir, base_url))
            .await?;

        let result = async {
            self.probe.wait_ready(base_url).await?;
            run_checked(
                self.runner.as_ref(),
                &self.suite_command(project_dir, headless, base_url),
            )
            .await
        }
        .await;

        if let Err(e) = server.stop().await {
            warn!(error = %e, "Failed to stop dev server");
        }
        result.map(|_| ())
    }
}

#[async_trait]
impl EndToEndTests for CypressTests {
    async fn run_tests(
        &self,
        project_dir: &Path,
        target: TestTarget,
        headless: bool,
        base_url: &Url,
    ) -> Result<()> {
        info!(target = %target, base_url = %base_url, headless, "Running end-to-end tests");
        match target {
            TestTarget::Local => self.run_local(project_dir, headless, base_url).await,
            TestTarget::Remote => {
                run_checked(
                    self.runner.as_ref(),
                    &self.suite_command(project_dir, headless, base_url),
                )
                .await?;
                Ok(())
            }
        }
    }
}
