//! Dependency validation gate.

use crate::config::{DeployToolConfig, RunConfig, ValidatorConfig};
use crate::package_json::{PackageManifest, PACKAGE_JSON};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Validation verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the project may proceed to build.
    pub valid: bool,

    /// Problems found, in the order they were detected (empty if valid).
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn passed() -> Self {
        Self::from_errors(Vec::new())
    }
}

/// Checks the generated project's dependency declarations. Read-only.
#[async_trait]
pub trait DependencyValidator: Send + Sync {
    async fn validate(&self, project_dir: &Path) -> Result<ValidationResult>;
}

/// Validates `package.json`:
/// - packages under the locked scope share a single version
/// - required peer packages are installed, i.e. declared in `dependencies`
///   or `devDependencies`
/// - the deployment tool is a dev dependency
pub struct PackageVersionValidator {
    rules: ValidatorConfig,
    deploy_tool: DeployToolConfig,
}

impl PackageVersionValidator {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            rules: config.validator.clone(),
            deploy_tool: config.deploy_tool.clone(),
        }
    }

    /// Evaluate the rules against a parsed manifest.
    pub fn evaluate(&self, manifest: &PackageManifest) -> ValidationResult {
        let mut errors = Vec::new();

        if !self.rules.locked_scope.is_empty() {
            let mut by_version: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for (name, version) in manifest.all_declared() {
                if name.starts_with(self.rules.locked_scope.as_str()) {
                    by_version.entry(version).or_default().push(name);
                }
            }
            if by_version.len() > 1 {
                let detail = by_version
                    .iter()
                    .map(|(version, names)| format!("{} @ {}", names.join(", "), version))
                    .collect::<Vec<_>>()
                    .join("; ");
                errors.push(format!(
                    "{} packages must share one version: {}",
                    self.rules.locked_scope.trim_end_matches('/'),
                    detail
                ));
            }
        }

        for required in &self.rules.required {
            if manifest.declared(required).is_none() {
                errors.push(format!("missing peer dependency {required}"));
            }
        }

        if !manifest
            .dev_dependencies
            .contains_key(&self.deploy_tool.package)
        {
            errors.push(format!(
                "missing dev dependency {} (deployment tool)",
                self.deploy_tool.package
            ));
        }

        ValidationResult::from_errors(errors)
    }
}

#[async_trait]
impl DependencyValidator for PackageVersionValidator {
    async fn validate(&self, project_dir: &Path) -> Result<ValidationResult> {
        let manifest = PackageManifest::read(&project_dir.join(PACKAGE_JSON))?;
        let result = self.evaluate(&manifest);
        tracing::info!(
            valid = result.valid,
            errors = result.errors.len(),
            "Dependency validation finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use tempfile::tempdir;

    fn validator() -> PackageVersionValidator {
        PackageVersionValidator::new(&RunConfig::default())
    }

    fn manifest(json: &str) -> PackageManifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_valid_project() {
        let result = validator().evaluate(&manifest(
            r#"{
                "dependencies": {
                    "@remix-run/architect": "1.6.5",
                    "@remix-run/react": "1.6.5",
                    "react": "^17.0.2",
                    "react-dom": "^17.0.2"
                },
                "devDependencies": {
                    "@remix-run/dev": "1.6.5",
                    "@architect/architect": "latest"
                }
            }"#,
        ));
        assert_eq!(result, ValidationResult::passed());
    }

    #[test]
    fn test_mismatched_scope_versions() {
        let result = validator().evaluate(&manifest(
            r#"{
                "dependencies": {
                    "@remix-run/react": "1.6.5",
                    "@remix-run/architect": "1.6.4",
                    "react": "17",
                    "react-dom": "17"
                },
                "devDependencies": { "@architect/architect": "latest" }
            }"#,
        ));
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("@remix-run packages must share one version"));
        assert!(result.errors[0].contains("@remix-run/architect @ 1.6.4"));
    }

    #[test]
    fn test_errors_are_ordered() {
        let result = validator().evaluate(&manifest(r#"{ "dependencies": { "react": "17" } }"#));
        assert_eq!(
            result.errors,
            vec![
                "missing peer dependency react-dom".to_string(),
                "missing dev dependency @architect/architect (deployment tool)".to_string(),
            ]
        );
    }

    #[test]
    fn test_peer_declaration_does_not_install() {
        let result = validator().evaluate(&manifest(
            r#"{
                "dependencies": { "react": "17" },
                "devDependencies": { "@architect/architect": "latest" },
                "peerDependencies": { "react-dom": "17" }
            }"#,
        ));
        assert_eq!(result.errors, vec!["missing peer dependency react-dom".to_string()]);

        let result = validator().evaluate(&manifest(
            r#"{
                "dependencies": { "react": "17" },
                "devDependencies": { "@architect/architect": "latest", "react-dom": "17" }
            }"#,
        ));
        assert!(result.valid);
    }

    #[tokio::test]
    async fn test_validate_reads_project() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(PACKAGE_JSON),
            r#"{"dependencies": {"react": "17", "react-dom": "17"}, "devDependencies": {"@architect/architect": "10"}}"#,
        )
        .unwrap();
        let before = std::fs::read(dir.path().join(PACKAGE_JSON)).unwrap();

        let result = validator().validate(dir.path()).await.unwrap();
        assert!(result.valid);
        assert_eq!(std::fs::read(dir.path().join(PACKAGE_JSON)).unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_io_error() {
        let dir = tempdir().unwrap();
        let err = validator().validate(dir.path()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Io { .. }));
    }
}
