//! Run configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is
//! a valid configuration for the Remix `arc` template. The CLI layers its
//! flags on top of whatever was loaded.

use crate::error::LifecycleError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Deployment environment of the disposable stack.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Staging,
    Production,
}

impl Environment {
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Test-harness files copied into every generated project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FixturesConfig {
    /// Directory copied as `<project>/<dir name>`
    pub dir: PathBuf,
    /// File copied as `<project>/<file name>`
    pub config_file: PathBuf,
}

impl Default for FixturesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cypress"),
            config_file: PathBuf::from("cypress.json"),
        }
    }
}

/// Deployment tool injected as a dev dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeployToolConfig {
    pub package: String,
    pub version: String,
}

impl Default for DeployToolConfig {
    fn default() -> Self {
        Self {
            package: "@architect/architect".to_string(),
            version: "latest".to_string(),
        }
    }
}

/// Dependency validation rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ValidatorConfig {
    /// Packages under this scope must all declare the same version
    pub locked_scope: String,
    /// Packages that must be declared (peer dependencies of the framework)
    pub required: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            locked_scope: "@remix-run/".to_string(),
            required: vec!["react".to_string(), "react-dom".to_string()],
        }
    }
}

/// Programs invoked by the stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub npm: String,
    pub npx: String,
    pub aws: String,
    /// Package run through `npx` to scaffold the project
    pub scaffolder: String,
    /// Binary run through `npx` for the end-to-end suite
    pub test_runner: String,
    /// Binary run through `npx` to deploy and destroy
    pub deployer: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            npm: "npm".to_string(),
            npx: "npx".to_string(),
            aws: "aws".to_string(),
            scaffolder: "create-remix@latest".to_string(),
            test_runner: "cypress".to_string(),
            deployer: "arc".to_string(),
        }
    }
}

/// Per-command timeouts in seconds. Zero disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub scaffold_secs: u64,
    pub install_secs: u64,
    pub build_secs: u64,
    pub tests_secs: u64,
    pub deploy_secs: u64,
    pub destroy_secs: u64,
    pub inventory_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scaffold_secs: 600,
            install_secs: 900,
            build_secs: 600,
            tests_secs: 1800,
            deploy_secs: 1800,
            destroy_secs: 1200,
            inventory_secs: 60,
        }
    }
}

/// Bounded polling window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    pub attempts: u32,
    pub interval_secs: u64,
}

impl PollConfig {
    pub fn new(attempts: u32, interval_secs: u64) -> Self {
        Self {
            attempts,
            interval_secs,
        }
    }

    /// A single attempt with no waiting.
    pub fn once() -> Self {
        Self::new(1, 0)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// AWS CLI scoping for inventory queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// Complete configuration of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Scaffolder template name
    pub template: String,
    /// Leading component of the generated app name
    pub app_prefix: String,
    /// Trailing component of the app name (random when unset)
    pub run_suffix: Option<String>,
    /// Parent directory of the generated project
    pub work_dir: PathBuf,
    pub environment: Environment,
    /// Request a statically typed source tree from the scaffolder
    pub typescript: bool,
    pub headless: bool,
    /// Base URL of the local dev server
    pub local_base_url: String,
    pub fixtures: FixturesConfig,
    pub deploy_tool: DeployToolConfig,
    pub validator: ValidatorConfig,
    pub tools: ToolsConfig,
    pub timeouts: TimeoutConfig,
    /// Inventory polling after deploy
    pub resolve: PollConfig,
    /// HTTP readiness polling of local and remote endpoints
    pub readiness: PollConfig,
    pub aws: AwsConfig,
    /// Extra variables for every child process
    pub env: BTreeMap<String, String>,
    /// Let a failed teardown turn a successful run into a failure
    pub fail_on_cleanup_error: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            template: "arc".to_string(),
            app_prefix: "tempstack".to_string(),
            run_suffix: None,
            work_dir: std::env::temp_dir(),
            environment: Environment::Staging,
            typescript: true,
            headless: true,
            local_base_url: "http://localhost:3333".to_string(),
            fixtures: FixturesConfig::default(),
            deploy_tool: DeployToolConfig::default(),
            validator: ValidatorConfig::default(),
            tools: ToolsConfig::default(),
            timeouts: TimeoutConfig::default(),
            resolve: PollConfig::new(10, 6),
            readiness: PollConfig::new(30, 2),
            aws: AwsConfig::default(),
            env: BTreeMap::new(),
            fail_on_cleanup_error: false,
        }
    }
}

impl RunConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LifecycleError::io(path, e))?;
        Self::from_json(&content)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Local base URL as a parsed URL.
    pub fn local_base_url(&self) -> Result<reqwest::Url> {
        reqwest::Url::parse(&self.local_base_url).map_err(|e| LifecycleError::InvalidEndpoint {
            stack_id: "local".to_string(),
            endpoint: format!("{} ({e})", self.local_base_url),
        })
    }
}
