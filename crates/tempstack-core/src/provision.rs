//! Project provisioning: scaffold from a template, then inject the test
//! harness and the deployment tool.

use crate::config::{DeployToolConfig, FixturesConfig, RunConfig};
use crate::error::LifecycleError;
use crate::identity::RunIdentity;
use crate::package_json::{self, PACKAGE_JSON};
use crate::process::{run_checked, CommandSpec, ProcessRunner};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Input of the external scaffolder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldRequest {
    pub template: String,
    pub project_dir: PathBuf,
    /// Request a statically typed source tree
    pub typescript: bool,
    /// Install dependencies while scaffolding
    pub install_deps: bool,
}

/// External tool that materializes a project skeleton from a template.
#[async_trait]
pub trait Scaffolder: Send + Sync {
    async fn scaffold(&self, request: &ScaffoldRequest) -> Result<()>;
}

/// Scaffolds through `npx <create-package>`.
pub struct CommandScaffolder {
    runner: Arc<dyn ProcessRunner>,
    npx: String,
    package: String,
    timeout_secs: u64,
    env: BTreeMap<String, String>,
}

impl CommandScaffolder {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &RunConfig) -> Self {
        Self {
            runner,
            npx: config.tools.npx.clone(),
            package: config.tools.scaffolder.clone(),
            timeout_secs: config.timeouts.scaffold_secs,
            env: config.env.clone(),
        }
    }

    /// Command line for a request.
    pub fn command(&self, request: &ScaffoldRequest) -> CommandSpec {
        let mut spec = CommandSpec::new("scaffold", &self.npx)
            .args(["--yes", self.package.as_str()])
            .arg(request.project_dir.to_string_lossy())
            .args(["--template", request.template.as_str()])
            .arg(if request.typescript {
                "--typescript"
            } else {
                "--no-typescript"
            })
            .arg(if request.install_deps {
                "--install"
            } else {
                "--no-install"
            })
            .envs(&self.env)
            .timeout_secs(self.timeout_secs);
        if let Some(parent) = request.project_dir.parent() {
            spec = spec.current_dir(parent);
        }
        spec
    }
}

#[async_trait]
impl Scaffolder for CommandScaffolder {
    async fn scaffold(&self, request: &ScaffoldRequest) -> Result<()> {
        if let Some(parent) = request.project_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LifecycleError::io(parent, e))?;
        }
        run_checked(self.runner.as_ref(), &self.command(request)).await?;
        Ok(())
    }
}

/// The generated project on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSkeleton {
    pub project_dir: PathBuf,
    /// Copied test-harness fixture directory
    pub fixtures_dir: PathBuf,
    /// Copied test-harness config file
    pub fixture_config: PathBuf,
    pub package_json: PathBuf,
}

/// Produces a runnable project for a run identity.
#[async_trait]
pub trait Provision: Send + Sync {
    async fn provision(&self, identity: &RunIdentity) -> Result<ProjectSkeleton>;
}

/// Scaffolds the project, then copies the fixtures and injects the
/// deployment tool concurrently.
pub struct Provisioner {
    scaffolder: Arc<dyn Scaffolder>,
    template: String,
    typescript: bool,
    fixtures: FixturesConfig,
    deploy_tool: DeployToolConfig,
}

impl Provisioner {
    pub fn new(scaffolder: Arc<dyn Scaffolder>, config: &RunConfig) -> Self {
        Self {
            scaffolder,
            template: config.template.clone(),
            typescript: config.typescript,
            fixtures: config.fixtures.clone(),
            deploy_tool: config.deploy_tool.clone(),
        }
    }
}

#[async_trait]
impl Provision for Provisioner {
    async fn provision(&self, identity: &RunIdentity) -> Result<ProjectSkeleton> {
        identity.ensure_project_dir_free()?;

        let request = ScaffoldRequest {
            template: self.template.clone(),
            project_dir: identity.project_dir.clone(),
            typescript: self.typescript,
            install_deps: false,
        };
        info!(template = %request.template, dir = %request.project_dir.display(), "Scaffolding project");
        self.scaffolder.scaffold(&request).await?;

        let project_dir = &identity.project_dir;
        let package_json = project_dir.join(PACKAGE_JSON);
        if !package_json.is_file() {
            return Err(LifecycleError::MissingSkeleton(project_dir.clone()));
        }

        let fixtures_dir = project_dir.join(file_name(&self.fixtures.dir)?);
        let fixture_config = project_dir.join(file_name(&self.fixtures.config_file)?);

        let package = package_json.clone();
        let tool = self.deploy_tool.clone();
        tokio::try_join!(
            copy_dir(&self.fixtures.dir, &fixtures_dir),
            copy_file(&self.fixtures.config_file, &fixture_config),
            async move {
                tokio::task::spawn_blocking(move || {
                    package_json::add_dev_dependency(&package, &tool.package, &tool.version)
                })
                .await
                .map_err(|e| LifecycleError::Panicked(e.to_string()))?
            },
        )?;

        info!(
            dir = %project_dir.display(),
            deploy_tool = %self.deploy_tool.package,
            "Project provisioned"
        );

        Ok(ProjectSkeleton {
            project_dir: project_dir.clone(),
            fixtures_dir,
            fixture_config,
            package_json,
        })
    }
}

fn file_name(path: &Path) -> Result<PathBuf> {
    path.file_name().map(PathBuf::from).ok_or_else(|| {
        LifecycleError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })
}

async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| LifecycleError::io(from, e))?;
    debug!(from = %from.display(), to = %to.display(), "Copied file");
    Ok(())
}

/// Recursively copy a directory tree.
async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    let mut copied = 0usize;

    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst)
            .await
            .map_err(|e| LifecycleError::io(&dst, e))?;
        let mut entries = tokio::fs::read_dir(&src)
            .await
            .map_err(|e| LifecycleError::io(&src, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LifecycleError::io(&src, e))?
        {
            let path = entry.path();
            let target = dst.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| LifecycleError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push((path, target));
            } else {
                tokio::fs::copy(&path, &target)
                    .await
                    .map_err(|e| LifecycleError::io(&path, e))?;
                copied += 1;
            }
        }
    }

    debug!(from = %from.display(), to = %to.display(), files = copied, "Copied directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::fakes::{RecordingProcessRunner, SkeletonScaffolder};
    use crate::package_json::PackageManifest;
    use tempfile::tempdir;

    fn fixtures(root: &Path) -> FixturesConfig {
        let dir = root.join("cypress");
        std::fs::create_dir_all(dir.join("integration")).unwrap();
        std::fs::write(dir.join("integration/smoke.spec.ts"), "it('loads', () => {})").unwrap();
        std::fs::write(dir.join("tsconfig.json"), "{}").unwrap();
        let config_file = root.join("cypress.json");
        std::fs::write(&config_file, r#"{"video": false}"#).unwrap();
        FixturesConfig { dir, config_file }
    }

    fn config(root: &Path) -> RunConfig {
        RunConfig {
            work_dir: root.join("runs"),
            fixtures: fixtures(root),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_scaffold_command_line() {
        let runner = Arc::new(RecordingProcessRunner::new());
        let scaffolder = CommandScaffolder::new(runner, &RunConfig::default());
        let spec = scaffolder.command(&ScaffoldRequest {
            template: "arc".to_string(),
            project_dir: PathBuf::from("/tmp/runs/app"),
            typescript: true,
            install_deps: false,
        });
        assert_eq!(
            spec.command_line(),
            "npx --yes create-remix@latest /tmp/runs/app --template arc --typescript --no-install"
        );
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp/runs")));
    }

    #[tokio::test]
    async fn test_provision_injects_fixtures_and_deploy_tool() {
        let root = tempdir().unwrap();
        let config = config(root.path());
        let identity = RunIdentity::new("tempstack-arc-test", Environment::Staging, &config.work_dir);
        let provisioner = Provisioner::new(Arc::new(SkeletonScaffolder::default()), &config);

        let skeleton = provisioner.provision(&identity).await.unwrap();

        assert!(skeleton.fixtures_dir.join("integration/smoke.spec.ts").is_file());
        assert!(skeleton.fixtures_dir.join("tsconfig.json").is_file());
        assert!(skeleton.fixture_config.is_file());
        let manifest = PackageManifest::read(&skeleton.package_json).unwrap();
        assert_eq!(manifest.declared("@architect/architect"), Some("latest"));
    }

    #[tokio::test]
    async fn test_missing_skeleton_skips_injection() {
        let root = tempdir().unwrap();
        let config = config(root.path());
        let identity = RunIdentity::new("tempstack-arc-empty", Environment::Staging, &config.work_dir);
        let provisioner = Provisioner::new(Arc::new(SkeletonScaffolder::empty()), &config);

        let err = provisioner.provision(&identity).await.unwrap_err();
        assert!(matches!(err, LifecycleError::MissingSkeleton(_)));
        assert!(!identity.project_dir.join("cypress").exists());
        assert!(!identity.project_dir.join("cypress.json").exists());
    }

    #[tokio::test]
    async fn test_scaffold_failure_propagates() {
        let root = tempdir().unwrap();
        let config = config(root.path());
        let identity = RunIdentity::new("tempstack-arc-fail", Environment::Staging, &config.work_dir);
        let runner = Arc::new(RecordingProcessRunner::new());
        runner.fail_when("scaffold", 1);
        let provisioner = Provisioner::new(
            Arc::new(CommandScaffolder::new(runner.clone(), &config)),
            &config,
        );

        let err = provisioner.provision(&identity).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Process { code: 1, .. }));
        assert_eq!(runner.count("scaffold"), 1);
    }
}
