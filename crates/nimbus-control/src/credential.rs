//! Ambient credential discovery for the management API.
//!
//! [`DefaultCredential`] tries each source in turn:
//!
//! 1. [`EnvironmentCredential`]: service principal from `AZURE_TENANT_ID`,
//!    `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`
//! 2. [`CliCredential`]: the signed-in Azure CLI session
//!
//! The first source that yields a token wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::CloudConfig;
use crate::error::{DeployError, DeployResult};

/// Environment variable holding the tenant ID.
pub const TENANT_ID_VAR: &str = "AZURE_TENANT_ID";
/// Environment variable holding the service principal client ID.
pub const CLIENT_ID_VAR: &str = "AZURE_CLIENT_ID";
/// Environment variable holding the service principal secret.
pub const CLIENT_SECRET_VAR: &str = "AZURE_CLIENT_SECRET";
/// Environment variable holding the subscription ID.
pub const SUBSCRIPTION_ID_VAR: &str = "AZURE_SUBSCRIPTION_ID";

/// Tokens this close to expiry (in seconds) are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 120;

/// A bearer token and its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The bearer token.
    pub token: SecretString,
    /// When the token stops being valid.
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Create a token.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_on,
        }
    }

    /// Whether the token is still usable for a while.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.expires_on - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > Utc::now()
    }

    /// The raw bearer token.
    #[must_use]
    pub fn secret(&self) -> &str {
        self.token.expose_secret()
    }
}

/// Source of bearer tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Obtain a token for `scope` (e.g. `https://management.azure.com/.default`).
    async fn get_token(&self, scope: &str) -> DeployResult<AccessToken>;
}

/// Scope covering the whole management API at `endpoint`.
#[must_use]
pub fn management_scope(endpoint: &str) -> String {
    format!("{}/.default", endpoint.trim_end_matches('/'))
}

fn scope_to_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

// =============================================================================
// Environment (service principal)
// =============================================================================

/// Service principal credential using the client-credentials grant.
pub struct EnvironmentCredential {
    http: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl EnvironmentCredential {
    /// Create a credential from explicit values.
    pub fn new(
        authority_host: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> DeployResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            http,
            authority_host: authority_host.into().trim_end_matches('/').to_owned(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret,
        })
    }

    /// Create a credential from the `AZURE_*` environment variables.
    ///
    /// Returns `Ok(None)` if any of them is missing.
    pub fn from_env(authority_host: &str) -> DeployResult<Option<Self>> {
        let tenant = std::env::var(TENANT_ID_VAR).ok();
        let client = std::env::var(CLIENT_ID_VAR).ok();
        let secret = std::env::var(CLIENT_SECRET_VAR).ok();

        match (tenant, client, secret) {
            (Some(tenant), Some(client), Some(secret)) => Ok(Some(Self::new(
                authority_host,
                tenant,
                client,
                SecretString::from(secret),
            )?)),
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for EnvironmentCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn get_token(&self, scope: &str) -> DeployResult<AccessToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DeployError::authentication(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::authentication(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeployError::authentication(format!("malformed token response: {e}")))?;

        Ok(AccessToken::new(
            token.access_token,
            Utc::now() + chrono::Duration::seconds(token.expires_in),
        ))
    }
}

// =============================================================================
// Azure CLI
// =============================================================================

/// Credential backed by the signed-in Azure CLI.
#[derive(Debug, Clone)]
pub struct CliCredential {
    program: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default, rename = "expires_on")]
    expires_on_unix: Option<i64>,
}

#[derive(Deserialize)]
struct CliAccount {
    id: String,
}

impl Default for CliCredential {
    fn default() -> Self {
        Self {
            program: "az".to_owned(),
        }
    }
}

impl CliCredential {
    /// Use a specific CLI executable.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> DeployResult<T> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                DeployError::authentication(format!("failed to run {}: {e}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::authentication(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DeployError::Serialisation(format!("unexpected CLI output: {e}")))
    }

    /// Subscription selected in the CLI session.
    pub async fn default_subscription(&self) -> DeployResult<String> {
        let account: CliAccount = self
            .run_json(&["account", "show", "--output", "json"])
            .await?;
        Ok(account.id)
    }
}

fn parse_cli_expiry(token: &CliToken) -> DateTime<Utc> {
    if let Some(ts) = token.expires_on_unix {
        if let Some(at) = Utc.timestamp_opt(ts, 0).single() {
            return at;
        }
    }

    token
        .expires_on
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map_or_else(
            || Utc::now() + chrono::Duration::minutes(5),
            |local| local.with_timezone(&Utc),
        )
}

#[async_trait]
impl TokenCredential for CliCredential {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn get_token(&self, scope: &str) -> DeployResult<AccessToken> {
        let token: CliToken = self
            .run_json(&[
                "account",
                "get-access-token",
                "--resource",
                scope_to_resource(scope),
                "--output",
                "json",
            ])
            .await?;

        let expires_on = parse_cli_expiry(&token);
        Ok(AccessToken::new(token.access_token, expires_on))
    }
}

// =============================================================================
// Chained default
// =============================================================================

/// Tries each configured credential source in order.
pub struct DefaultCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
}

impl DefaultCredential {
    /// Build the standard chain for a cloud configuration.
    pub fn from_config(cloud: &CloudConfig) -> DeployResult<Self> {
        let mut sources: Vec<Arc<dyn TokenCredential>> = Vec::new();
        if let Some(env) = EnvironmentCredential::from_env(&cloud.authority_host)? {
            sources.push(Arc::new(env));
        }
        sources.push(Arc::new(CliCredential::default()));
        Ok(Self { sources })
    }

    /// Build a chain from explicit sources.
    #[must_use]
    pub fn from_sources(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self { sources }
    }
}

impl std::fmt::Debug for DefaultCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("DefaultCredential")
            .field("sources", &names)
            .finish()
    }
}

#[async_trait]
impl TokenCredential for DefaultCredential {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn get_token(&self, scope: &str) -> DeployResult<AccessToken> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    debug!(source = source.name(), "acquired management token");
                    return Ok(token);
                }
                Err(e) => {
                    debug!(source = source.name(), error = %e, "credential source failed");
                    failures.push(format!("{}: {e}", source.name()));
                }
            }
        }

        Err(DeployError::authentication(if failures.is_empty() {
            "no credential sources configured".to_owned()
        } else {
            failures.join("; ")
        }))
    }
}

/// Resolve the subscription to operate in.
///
/// Checks the configuration, then `AZURE_SUBSCRIPTION_ID`, then the CLI session.
pub async fn resolve_subscription(cloud: &CloudConfig) -> DeployResult<String> {
    if let Some(id) = &cloud.subscription_id {
        return Ok(id.clone());
    }
    if let Ok(id) = std::env::var(SUBSCRIPTION_ID_VAR) {
        return Ok(id);
    }
    CliCredential::default()
        .default_subscription()
        .await
        .map_err(|e| DeployError::authentication(format!("no subscription selected: {e}")))
}
