//! Dependency install and project build.

use crate::config::RunConfig;
use crate::process::{run_checked, CommandSpec, ProcessRunner};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait Build: Send + Sync {
    /// Install dependencies, then build. Either failing fails the stage.
    async fn build(&self, project_dir: &Path) -> Result<()>;
}

/// `npm install` followed by `npm run build`.
pub struct NpmBuild {
    runner: Arc<dyn ProcessRunner>,
    npm: String,
    install_timeout_secs: u64,
    build_timeout_secs: u64,
    env: BTreeMap<String, String>,
}

impl NpmBuild {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &RunConfig) -> Self {
        Self {
            runner,
            npm: config.tools.npm.clone(),
            install_timeout_secs: config.timeouts.install_secs,
            build_timeout_secs: config.timeouts.build_secs,
            env: config.env.clone(),
        }
    }

    pub fn commands(&self, project_dir: &Path) -> [CommandSpec; 2] {
        [
            CommandSpec::new("install", &self.npm)
                .arg("install")
                .current_dir(project_dir)
                .envs(&self.env)
                .timeout_secs(self.install_timeout_secs),
            CommandSpec::new("build", &self.npm)
                .args(["run", "build"])
                .current_dir(project_dir)
                .envs(&self.env)
                .timeout_secs(self.build_timeout_secs),
        ]
    }
}

#[async_trait]
impl Build for NpmBuild {
    async fn build(&self, project_dir: &Path) -> Result<()> {
        for spec in self.commands(project_dir) {
            run_checked(self.runner.as_ref(), &spec).await?;
        }
        Ok(())
    }
}
