//! HTTP readiness polling for dev servers and fresh deployments.

use crate::config::PollConfig;
use crate::error::LifecycleError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};

/// Waits until an endpoint answers.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn wait_ready(&self, url: &Url) -> Result<()>;
}

/// Polls with HTTP GET until any non-5xx response arrives.
pub struct HttpReadinessProbe {
    client: reqwest::Client,
    poll: PollConfig,
}

impl HttpReadinessProbe {
    pub fn new(poll: PollConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tempstack/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, poll })
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn wait_ready(&self, url: &Url) -> Result<()> {
        let attempts = self.poll.attempts.max(1);
        for attempt in 1..=attempts {
            match self.client.get(url.clone()).send().await {
                Ok(response) if !response.status().is_server_error() => {
                    info!(url = %url, status = %response.status(), attempt, "Endpoint ready");
                    return Ok(());
                }
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), attempt, "Endpoint not ready")
                }
                Err(e) => debug!(url = %url, error = %e, attempt, "Endpoint unreachable"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.poll.interval()).await;
            }
        }
        Err(LifecycleError::EndpointNotReady {
            url: url.to_string(),
            attempts,
        })
    }
}
