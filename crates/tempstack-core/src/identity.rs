//! Run identity: the single name every stage of one run refers to.

use crate::config::{Environment, RunConfig};
use crate::error::LifecycleError;
use crate::Result;
use arc_manifest::stack_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Length of the random run suffix.
const SUFFIX_LEN: usize = 7;

/// Identity of one disposable environment.
///
/// Computed once at run start and passed by reference to every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Application name written into the manifest and passed to destroy
    pub app_name: String,

    /// CloudFormation stack (and API gateway) name of the deployed app
    pub stack_id: String,

    /// Directory the project is generated into
    pub project_dir: PathBuf,

    pub environment: Environment,
}

impl RunIdentity {
    /// Build an identity from explicit parts.
    pub fn new(app_name: &str, environment: Environment, work_dir: &Path) -> Self {
        Self {
            app_name: app_name.to_string(),
            stack_id: stack_name(app_name, environment.name()),
            project_dir: work_dir.join(app_name),
            environment,
        }
    }

    /// Generate the identity for a run described by `config`.
    pub fn generate(config: &RunConfig) -> Self {
        let suffix = config
            .run_suffix
            .clone()
            .unwrap_or_else(random_suffix);
        let app_name = app_name(&config.app_prefix, &config.template, &suffix);
        Self::new(&app_name, config.environment, &config.work_dir)
    }

    /// Refuse to scaffold over an existing, non-empty directory.
    pub fn ensure_project_dir_free(&self) -> Result<()> {
        match std::fs::read_dir(&self.project_dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Err(LifecycleError::ProjectDirNotEmpty(self.project_dir.clone()));
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LifecycleError::io(&self.project_dir, e)),
        }
    }
}

/// `{prefix}-{template}-{suffix}`, lowercased, with anything outside
/// `[a-z0-9-]` replaced by `-`.
pub fn app_name(prefix: &str, template: &str, suffix: &str) -> String {
    let raw = [prefix, template, suffix]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-");

    raw.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..SUFFIX_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_app_name_format() {
        assert_eq!(app_name("tempstack", "arc", "1a2b3c4"), "tempstack-arc-1a2b3c4");
        assert_eq!(app_name("CI Run", "arc", "ABC"), "ci-run-arc-abc");
        assert_eq!(app_name("", "arc", "x"), "arc-x");
    }

    #[test]
    fn test_identity_from_explicit_suffix() {
        let config = RunConfig {
            run_suffix: Some("abc1234".to_string()),
            work_dir: PathBuf::from("/tmp/runs"),
            ..RunConfig::default()
        };
        let identity = RunIdentity::generate(&config);
        assert_eq!(identity.app_name, "tempstack-arc-abc1234");
        assert_eq!(identity.stack_id, "TempstackArcAbc1234Staging");
        assert_eq!(identity.project_dir, PathBuf::from("/tmp/runs/tempstack-arc-abc1234"));
    }

    #[test]
    fn test_generated_names_are_unique() {
        let config = RunConfig::default();
        let a = RunIdentity::generate(&config);
        let b = RunIdentity::generate(&config);
        assert_ne!(a.app_name, b.app_name);
        assert_eq!(a.app_name.len(), "tempstack-arc-".len() + SUFFIX_LEN);
    }

    #[test]
    fn test_production_stack_id() {
        let identity = RunIdentity::new("my-app", Environment::Production, Path::new("/w"));
        assert_eq!(identity.stack_id, "MyAppProduction");
    }

    #[test]
    fn test_ensure_project_dir_free() {
        let dir = tempdir().unwrap();
        let identity = RunIdentity::new("app", Environment::Staging, dir.path());
        assert!(identity.ensure_project_dir_free().is_ok());

        std::fs::create_dir(&identity.project_dir).unwrap();
        assert!(identity.ensure_project_dir_free().is_ok());

        std::fs::write(identity.project_dir.join("package.json"), "{}").unwrap();
        assert!(matches!(
            identity.ensure_project_dir_free(),
            Err(LifecycleError::ProjectDirNotEmpty(_))
        ));
    }
}
