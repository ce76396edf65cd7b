//! Deployment manager: manifest rewrite, deploy, endpoint resolution and
//! teardown through Architect.

pub mod inventory;

pub use inventory::{
    find_deployment, resolve_endpoint, ApiGateway, AwsCliInventory, DeploymentRecord, Inventory,
};

use crate::config::{Environment, PollConfig, RunConfig};
use crate::process::{run_checked, CommandSpec, ProcessRunner};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Overwrite the `app` declaration of the manifest at `manifest_path`.
/// Every other section is preserved byte-for-byte.
pub fn set_app_name(manifest_path: &Path, app_name: &str) -> Result<()> {
    arc_manifest::set_app_name(manifest_path, app_name)?;
    Ok(())
}

/// Deployment operations the orchestrator needs.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Locate the project's manifest and point it at `app_name`.
    /// Returns the manifest path.
    async fn set_app_name(&self, project_dir: &Path, app_name: &str) -> Result<PathBuf>;

    /// Deploy the project, pruning unused resources.
    async fn deploy(&self, project_dir: &Path) -> Result<()>;

    /// Find the live endpoint of `stack_id`.
    async fn resolve_endpoint(&self, stack_id: &str) -> Result<DeploymentRecord>;

    /// Tear the app down, storage included.
    async fn destroy(&self, app_name: &str, project_dir: &Path) -> Result<()>;
}

/// Architect (`npx arc`) deployer with an inventory for endpoint lookup.
pub struct ArcDeployer {
    runner: Arc<dyn ProcessRunner>,
    inventory: Arc<dyn Inventory>,
    npx: String,
    deployer: String,
    environment: Environment,
    resolve: PollConfig,
    deploy_timeout_secs: u64,
    destroy_timeout_secs: u64,
    env: BTreeMap<String, String>,
}

impl ArcDeployer {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        inventory: Arc<dyn Inventory>,
        config: &RunConfig,
    ) -> Self {
        Self {
            runner,
            inventory,
            npx: config.tools.npx.clone(),
            deployer: config.tools.deployer.clone(),
            environment: config.environment,
            resolve: config.resolve,
            deploy_timeout_secs: config.timeouts.deploy_secs,
            destroy_timeout_secs: config.timeouts.destroy_secs,
            env: config.env.clone(),
        }
    }

    fn base(&self, name: &str, subcommand: &str) -> CommandSpec {
        CommandSpec::new(name, &self.npx)
            .args([self.deployer.as_str(), subcommand])
            .envs(&self.env)
    }

    fn scope(&self, spec: CommandSpec) -> CommandSpec {
        match self.environment {
            Environment::Staging => spec,
            Environment::Production => spec.arg("--production"),
        }
    }

    pub fn deploy_command(&self, project_dir: &Path) -> CommandSpec {
        self.scope(self.base("deploy", "deploy").arg("--prune"))
            .current_dir(project_dir)
            .timeout_secs(self.deploy_timeout_secs)
    }

    pub fn destroy_command(&self, app_name: &str, project_dir: &Path) -> CommandSpec {
        let spec = self
            .scope(
                self.base("destroy", "destroy")
                    .args(["--app", app_name])
                    .arg("--force"),
            )
            .timeout_secs(self.destroy_timeout_secs);
        if project_dir.is_dir() {
            spec.current_dir(project_dir)
        } else {
            spec
        }
    }
}

#[async_trait]
impl Deployer for ArcDeployer {
    async fn set_app_name(&self, project_dir: &Path, app_name: &str) -> Result<PathBuf> {
        let manifest = arc_manifest::locate(project_dir)?;
        set_app_name(&manifest, app_name)?;
        info!(manifest = %manifest.display(), app = app_name, "Manifest points at run app name");
        Ok(manifest)
    }

    async fn deploy(&self, project_dir: &Path) -> Result<()> {
        run_checked(self.runner.as_ref(), &self.deploy_command(project_dir)).await?;
        Ok(())
    }

    async fn resolve_endpoint(&self, stack_id: &str) -> Result<DeploymentRecord> {
        resolve_endpoint(self.inventory.as_ref(), stack_id, self.resolve).await
    }

    async fn destroy(&self, app_name: &str, project_dir: &Path) -> Result<()> {
        info!(app = app_name, environment = %self.environment, "Destroying app");
        run_checked(
            self.runner.as_ref(),
            &self.destroy_command(app_name, project_dir),
        )
        .await?;
        Ok(())
    }
}
