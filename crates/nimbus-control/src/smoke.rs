//! Post-deployment smoke test against an app's HTTP trigger.

use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::config::SmokeTestConfig;
use crate::error::{DeployError, DeployResult};
use crate::types::FunctionApp;

/// Result of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeOutcome {
    /// URL that was invoked.
    pub url: String,
    /// Trimmed response body.
    pub response: String,
}

/// Invokes a deployed function with a known input and checks the answer.
#[derive(Debug, Clone)]
pub struct SmokeTest {
    client: Client,
    config: SmokeTestConfig,
}

impl SmokeTest {
    /// Create a smoke test from configuration.
    pub fn new(config: &SmokeTestConfig) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Whether the probe should run at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Probe `app` on its default host.
    pub async fn run(&self, app: &FunctionApp) -> DeployResult<SmokeOutcome> {
        self.probe(&app.base_url(&self.config.scheme)).await
    }

    /// Warm the endpoint up, wait, then invoke it and check the response.
    pub async fn probe(&self, base_url: &str) -> DeployResult<SmokeOutcome> {
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.config.path.trim_start_matches('/')
        );

        if let Err(e) = self.invoke(&url).await {
            warn!(%url, error = %e, "warm-up request failed");
        }
        tokio::time::sleep(Duration::from_secs(self.config.warmup_secs)).await;

        let response = self.invoke(&url).await?;
        info!(%url, input = %self.config.input, %response, "smoke test response");

        if let Some(expected) = &self.config.expected {
            if response != expected.trim() {
                return Err(DeployError::SmokeTest(format!(
                    "{url} answered {response:?}, expected {expected:?}"
                )));
            }
        }

        Ok(SmokeOutcome { url, response })
    }

    async fn invoke(&self, url: &str) -> DeployResult<String> {
        let response = self
            .client
            .post(url)
            .body(self.config.input.clone())
            .send()
            .await
            .map_err(|e| DeployError::SmokeTest(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeployError::SmokeTest(format!("unreadable response from {url}: {e}")))?;

        if !status.is_success() {
            return Err(DeployError::SmokeTest(format!(
                "{url} returned {status}: {}",
                body.trim()
            )));
        }

        Ok(body.trim().to_owned())
    }
}
