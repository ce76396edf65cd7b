//! Cloud inventory lookup of deployed API gateways.

use crate::config::{AwsConfig, PollConfig, RunConfig};
use crate::error::LifecycleError;
use crate::process::{run_checked, CommandSpec, ProcessRunner};
use crate::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One API gateway as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ApiGateway {
    pub name: String,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub api_id: Option<String>,
}

/// `aws apigatewayv2 get-apis` output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetApisOutput {
    #[serde(default)]
    items: Vec<ApiGateway>,
}

/// A live deployment discovered in the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub endpoint: Url,
    pub name: String,
}

/// Read-only query of deployed API gateways.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn list_api_gateways(&self) -> Result<Vec<ApiGateway>>;
}

/// Inventory through the AWS CLI.
pub struct AwsCliInventory {
    runner: Arc<dyn ProcessRunner>,
    aws: String,
    scope: AwsConfig,
    timeout_secs: u64,
    env: BTreeMap<String, String>,
}

impl AwsCliInventory {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &RunConfig) -> Self {
        Self {
            runner,
            aws: config.tools.aws.clone(),
            scope: config.aws.clone(),
            timeout_secs: config.timeouts.inventory_secs,
            env: config.env.clone(),
        }
    }

    pub fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new("inventory", &self.aws)
            .args(["apigatewayv2", "get-apis", "--output", "json"])
            .envs(&self.env)
            .timeout_secs(self.timeout_secs)
            .captured();
        if let Some(region) = &self.scope.region {
            spec = spec.args(["--region", region.as_str()]);
        }
        if let Some(profile) = &self.scope.profile {
            spec = spec.args(["--profile", profile.as_str()]);
        }
        spec
    }
}

#[async_trait]
impl Inventory for AwsCliInventory {
    async fn list_api_gateways(&self) -> Result<Vec<ApiGateway>> {
        let output = run_checked(self.runner.as_ref(), &self.command()).await?;
        let parsed: GetApisOutput = serde_json::from_str(&output.stdout)?;
        debug!(count = parsed.items.len(), "Listed API gateways");
        Ok(parsed.items)
    }
}

/// Pick the gateway named `stack_id`.
///
/// No match is `Ok(None)`; more than one match is an error rather than an
/// arbitrary pick.
pub fn find_deployment(gateways: &[ApiGateway], stack_id: &str) -> Result<Option<DeploymentRecord>> {
    let matches: Vec<&ApiGateway> = gateways.iter().filter(|g| g.name == stack_id).collect();
    match matches.as_slice() {
        [] => Ok(None),
        [gateway] => {
            let raw = gateway.api_endpoint.clone().unwrap_or_default();
            let endpoint = Url::parse(&raw).map_err(|_| LifecycleError::InvalidEndpoint {
                stack_id: stack_id.to_string(),
                endpoint: raw.clone(),
            })?;
            Ok(Some(DeploymentRecord {
                endpoint,
                name: gateway.name.clone(),
            }))
        }
        many => Err(LifecycleError::AmbiguousDeployment {
            stack_id: stack_id.to_string(),
            count: many.len(),
        }),
    }
}

/// Poll the inventory until the stack shows up or the window elapses.
pub async fn resolve_endpoint(
    inventory: &dyn Inventory,
    stack_id: &str,
    poll: PollConfig,
) -> Result<DeploymentRecord> {
    let attempts = poll.attempts.max(1);
    for attempt in 1..=attempts {
        let gateways = inventory.list_api_gateways().await?;
        if let Some(record) = find_deployment(&gateways, stack_id)? {
            info!(stack = stack_id, endpoint = %record.endpoint, attempt, "Resolved deployment");
            return Ok(record);
        }
        if attempt < attempts {
            debug!(stack = stack_id, attempt, "Deployment not visible yet");
            tokio::time::sleep(poll.interval()).await;
        }
    }
    warn!(stack = stack_id, attempts, "Deployment not found");
    Err(LifecycleError::DeploymentNotFound {
        stack_id: stack_id.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeInventory, RecordingProcessRunner};
    use crate::process::ProcessOutput;

    fn gateway(name: &str, endpoint: &str) -> ApiGateway {
        ApiGateway {
            name: name.to_string(),
            api_endpoint: Some(endpoint.to_string()),
            api_id: None,
        }
    }

    #[test]
    fn test_no_match() {
        assert_eq!(find_deployment(&[], "AppStaging").unwrap(), None);
        let others = [
            gateway("OtherStaging", "https://a.example.com"),
            gateway("AppProduction", "https://b.example.com"),
        ];
        assert_eq!(find_deployment(&others, "AppStaging").unwrap(), None);
    }

    #[test]
    fn test_unique_match() {
        let gateways = [
            gateway("OtherStaging", "https://a.example.com"),
            gateway("AppStaging", "https://abc.execute-api.us-west-2.amazonaws.com"),
        ];
        let record = find_deployment(&gateways, "AppStaging").unwrap().unwrap();
        assert_eq!(record.name, "AppStaging");
        assert_eq!(record.endpoint.host_str(), Some("abc.execute-api.us-west-2.amazonaws.com"));
    }

    #[test]
    fn test_duplicate_match_is_rejected() {
        let gateways = [
            gateway("AppStaging", "https://a.example.com"),
            gateway("AppStaging", "https://b.example.com"),
        ];
        assert!(matches!(
            find_deployment(&gateways, "AppStaging"),
            Err(LifecycleError::AmbiguousDeployment { count: 2, .. })
        ));
    }

    #[test]
    fn test_missing_endpoint_is_invalid() {
        let gateways = [ApiGateway {
            name: "AppStaging".to_string(),
            api_endpoint: None,
            api_id: Some("abc".to_string()),
        }];
        assert!(matches!(
            find_deployment(&gateways, "AppStaging"),
            Err(LifecycleError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_polls_until_visible() {
        let inventory = FakeInventory::appearing_after(
            2,
            vec![gateway("AppStaging", "https://abc.example.com")],
        );
        let record = resolve_endpoint(&inventory, "AppStaging", PollConfig::new(5, 0))
            .await
            .unwrap();
        assert_eq!(record.endpoint.as_str(), "https://abc.example.com/");
        assert_eq!(inventory.queries(), 3);
    }

    #[tokio::test]
    async fn test_resolve_gives_up_after_window() {
        let inventory = FakeInventory::empty();
        let err = resolve_endpoint(&inventory, "AppStaging", PollConfig::new(3, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DeploymentNotFound { attempts: 3, .. }));
        assert_eq!(inventory.queries(), 3);
    }

    #[tokio::test]
    async fn test_aws_cli_inventory_parses_items() {
        let runner = Arc::new(RecordingProcessRunner::new());
        runner.respond_with(
            "inventory",
            ProcessOutput::success(
                r#"{"Items": [{"ApiEndpoint": "https://abc.execute-api.us-west-2.amazonaws.com", "ApiId": "abc", "Name": "AppStaging", "ProtocolType": "HTTP"}]}"#,
            ),
        );
        let config = RunConfig {
            aws: AwsConfig {
                region: Some("us-west-2".to_string()),
                profile: None,
            },
            ..RunConfig::default()
        };
        let inventory = AwsCliInventory::new(runner.clone(), &config);

        let gateways = inventory.list_api_gateways().await.unwrap();
        assert_eq!(gateways.len(), 1);
        assert_eq!(gateways[0].name, "AppStaging");
        assert_eq!(
            runner.calls_named("inventory")[0].command_line(),
            "aws apigatewayv2 get-apis --output json --region us-west-2"
        );
    }

    #[tokio::test]
    async fn test_empty_inventory_output() {
        let runner = Arc::new(RecordingProcessRunner::new());
        runner.respond_with("inventory", ProcessOutput::success("{}"));
        let inventory = AwsCliInventory::new(runner, &RunConfig::default());
        assert!(inventory.list_api_gateways().await.unwrap().is_empty());
    }
}
