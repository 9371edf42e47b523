//! Configuration for nimbus-control.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{DeployError, DeployResult};
use crate::operation::WaitPolicy;
use crate::types::{AppRef, ContainerImage, PlanTier, Region, RuntimeStack};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "NIMBUS_";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "deploy.toml";

/// Top-level configuration for a deployment run.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeployConfig {
    /// Management API endpoints and credentials.
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Which management client to use.
    #[serde(default)]
    pub client: ClientConfig,

    /// Name generation for resources created by the run.
    #[serde(default)]
    pub naming: NamingConfig,

    /// Where and how new resources are provisioned.
    #[serde(default)]
    pub provision: ProvisionConfig,

    /// Deployment artifacts and wait behaviour.
    #[serde(default)]
    pub deploy: DeployBehaviour,

    /// Pre-existing apps targeted by later steps.
    #[serde(default)]
    pub targets: TargetsConfig,

    /// Runtime stack applied by the runtime switch step.
    #[serde(default)]
    pub runtime_switch: RuntimeStack,

    /// Container image applied by the container switch step.
    #[serde(default)]
    pub container: ContainerConfig,

    /// Post-deployment smoke test.
    #[serde(default)]
    pub smoke_test: SmokeTestConfig,

    /// Teardown behaviour.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl DeployConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `deploy.toml` in the current directory (if present)
    /// 3. Environment variables with `NIMBUS_` prefix
    pub fn load() -> DeployResult<Self> {
        Self::from_file(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DeployResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| DeployError::Config(e.to_string()))
    }

    /// Check that every external reference the pipeline needs is present.
    pub fn validate(&self) -> DeployResult<()> {
        let mut missing = Vec::new();
        if self.targets.archive.is_none() {
            missing.push("targets.archive");
        }
        if self.targets.runtime.is_none() {
            missing.push("targets.runtime");
        }
        if self.targets.container.is_none() {
            missing.push("targets.container");
        }
        if self.container.image.is_none() {
            missing.push("container.image");
        }
        if !missing.is_empty() {
            return Err(DeployError::config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if self.deploy.timeout_secs == 0 {
            return Err(DeployError::config("deploy.timeout_secs must be positive"));
        }
        if self.deploy.poll_interval_secs == 0 {
            return Err(DeployError::config(
                "deploy.poll_interval_secs must be positive",
            ));
        }

        Ok(())
    }

    /// Wait policy applied to every asynchronous operation.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_secs(self.deploy.timeout_secs),
            Duration::from_secs(self.deploy.poll_interval_secs),
        )
    }
}

/// Management API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Resource management endpoint.
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,

    /// Identity provider authority host.
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    /// Subscription to operate in. Discovered from the environment when unset.
    pub subscription_id: Option<String>,

    /// API version for resource group calls.
    #[serde(default = "default_resources_api_version")]
    pub resources_api_version: String,

    /// API version for hosting plan and function app calls.
    #[serde(default = "default_web_api_version")]
    pub web_api_version: String,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_management_endpoint() -> String {
    "https://management.azure.com".to_owned()
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_owned()
}

fn default_resources_api_version() -> String {
    "2021-04-01".to_owned()
}

fn default_web_api_version() -> String {
    "2022-03-01".to_owned()
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            management_endpoint: default_management_endpoint(),
            authority_host: default_authority_host(),
            subscription_id: None,
            resources_api_version: default_resources_api_version(),
            web_api_version: default_web_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Management client selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Type of client to use.
    #[serde(default)]
    pub kind: ClientKind,
}

/// Type of management client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// REST client against the real management API.
    #[default]
    Arm,

    /// In-memory client for dry runs and testing.
    Memory,
}

/// Resource naming configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NamingConfig {
    /// Prefix for the first new function app.
    #[serde(default = "default_primary_app_prefix")]
    pub primary_app_prefix: String,

    /// Prefix for the second new function app.
    #[serde(default = "default_secondary_app_prefix")]
    pub secondary_app_prefix: String,

    /// Prefix for the new resource group.
    #[serde(default = "default_resource_group_prefix")]
    pub resource_group_prefix: String,

    /// Maximum length of generated app names.
    #[serde(default = "default_app_name_max_len")]
    pub app_name_max_len: usize,

    /// Maximum length of generated resource group names.
    #[serde(default = "default_resource_group_max_len")]
    pub resource_group_max_len: usize,
}

fn default_primary_app_prefix() -> String {
    "fnapp1-".to_owned()
}

fn default_secondary_app_prefix() -> String {
    "fnapp2-".to_owned()
}

fn default_resource_group_prefix() -> String {
    "rgfn_".to_owned()
}

const fn default_app_name_max_len() -> usize {
    20
}

const fn default_resource_group_max_len() -> usize {
    24
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            primary_app_prefix: default_primary_app_prefix(),
            secondary_app_prefix: default_secondary_app_prefix(),
            resource_group_prefix: default_resource_group_prefix(),
            app_name_max_len: default_app_name_max_len(),
            resource_group_max_len: default_resource_group_max_len(),
        }
    }
}

/// Provisioning configuration for new resources.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// Region new resources are created in.
    #[serde(default)]
    pub region: Region,

    /// Tier of the new hosting plan.
    #[serde(default)]
    pub plan_tier: PlanTier,

    /// Suffix appended to the primary app name to form the plan name.
    #[serde(default = "default_plan_suffix")]
    pub plan_suffix: String,

    /// Runtime stack new apps are created with.
    #[serde(default = "default_initial_runtime")]
    pub runtime: RuntimeStack,

    /// Storage connection string handed to new apps, if any.
    pub storage_connection: Option<String>,
}

fn default_plan_suffix() -> String {
    "-plan".to_owned()
}

fn default_initial_runtime() -> RuntimeStack {
    RuntimeStack::new("node", "~4", "node|18")
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            region: Region::default(),
            plan_tier: PlanTier::default(),
            plan_suffix: default_plan_suffix(),
            runtime: default_initial_runtime(),
            storage_connection: None,
        }
    }
}

/// Deployment artifacts and wait behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployBehaviour {
    /// Archive deployed to the second new app.
    #[serde(default = "default_primary_archive")]
    pub primary_archive: PathBuf,

    /// Archive deployed to the pre-existing archive target.
    #[serde(default = "default_secondary_archive")]
    pub secondary_archive: PathBuf,

    /// Upper bound on each asynchronous operation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How often to poll operation status, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Pause after the existing-app deployment, in seconds.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

fn default_primary_archive() -> PathBuf {
    PathBuf::from("artifacts/nodejs-function-app.zip")
}

fn default_secondary_archive() -> PathBuf {
    PathBuf::from("artifacts/python-function-app.zip")
}

const fn default_timeout_secs() -> u64 {
    300 // 5 minutes
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_settle_secs() -> u64 {
    25
}

impl Default for DeployBehaviour {
    fn default() -> Self {
        Self {
            primary_archive: default_primary_archive(),
            secondary_archive: default_secondary_archive(),
            timeout_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            settle_secs: default_settle_secs(),
        }
    }
}

/// Pre-existing apps targeted by the later pipeline steps.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetsConfig {
    /// App that receives the secondary archive.
    pub archive: Option<AppRef>,

    /// App whose runtime stack is switched.
    pub runtime: Option<AppRef>,

    /// App switched to a container image.
    pub container: Option<AppRef>,
}

/// Container switch configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    /// Public image reference.
    pub image: Option<ContainerImage>,
}

/// Post-deployment smoke test configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmokeTestConfig {
    /// Whether to run the smoke test at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// URL scheme used to reach the app.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// HTTP trigger path.
    #[serde(default = "default_smoke_path")]
    pub path: String,

    /// Request body.
    #[serde(default = "default_smoke_input")]
    pub input: String,

    /// Expected response body, compared after trimming.
    #[serde(default = "default_smoke_expected")]
    pub expected: Option<String>,

    /// Delay between the warm-up request and the checked request, in seconds.
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_smoke_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    "http".to_owned()
}

fn default_smoke_path() -> String {
    "/api/square".to_owned()
}

fn default_smoke_input() -> String {
    "926".to_owned()
}

#[allow(clippy::unnecessary_wraps)]
fn default_smoke_expected() -> Option<String> {
    Some("857476".to_owned())
}

const fn default_warmup_secs() -> u64 {
    5
}

const fn default_smoke_request_timeout_secs() -> u64 {
    30
}

impl Default for SmokeTestConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            scheme: default_scheme(),
            path: default_smoke_path(),
            input: default_smoke_input(),
            expected: default_smoke_expected(),
            warmup_secs: default_warmup_secs(),
            request_timeout_secs: default_smoke_request_timeout_secs(),
        }
    }
}

/// Teardown configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupConfig {
    /// Delete resource groups created by the run once it finishes.
    #[serde(default)]
    pub delete_created: bool,
}
