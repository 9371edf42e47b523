//! Core resource types for nimbus-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-assigned identifier for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new resource ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for an asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Create a new operation ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique operation ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deployment region, in the provider's short form (e.g. `westus`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    /// Create a region from its short name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the region name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new("westus")
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical container for resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Provider resource ID.
    pub id: ResourceId,
    /// Group name (unique within the subscription).
    pub name: String,
    /// Region the group metadata lives in.
    pub region: Region,
}

/// Pricing tier of a hosting plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Pay-per-execution consumption plan.
    #[default]
    Consumption,
    /// Elastic premium plan.
    Premium,
    /// Dedicated (basic) plan.
    Dedicated,
}

impl PlanTier {
    /// SKU name as understood by the provider.
    #[must_use]
    pub const fn sku_name(&self) -> &'static str {
        match self {
            Self::Consumption => "Y1",
            Self::Premium => "EP1",
            Self::Dedicated => "B1",
        }
    }

    /// SKU tier as understood by the provider.
    #[must_use]
    pub const fn sku_tier(&self) -> &'static str {
        match self {
            Self::Consumption => "Dynamic",
            Self::Premium => "ElasticPremium",
            Self::Dedicated => "Basic",
        }
    }

    /// Parse a provider SKU tier.
    #[must_use]
    pub fn from_sku_tier(tier: &str) -> Option<Self> {
        match tier {
            "Dynamic" => Some(Self::Consumption),
            "ElasticPremium" => Some(Self::Premium),
            "Basic" => Some(Self::Dedicated),
            _ => None,
        }
    }

    /// Get the tier name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Premium => "premium",
            Self::Dedicated => "dedicated",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A compute tier shared by one or more function apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingPlan {
    /// Provider resource ID.
    pub id: ResourceId,
    /// Plan name.
    pub name: String,
    /// Resource group the plan belongs to.
    pub resource_group: String,
    /// Region the plan runs in.
    pub region: Region,
    /// Pricing tier.
    pub tier: PlanTier,
}

/// Request to create a hosting plan, or fetch it if it already exists.
#[derive(Debug, Clone)]
pub struct PlanSpec {
    /// Plan name.
    pub name: String,
    /// Resource group to create the plan in.
    pub resource_group: String,
    /// Region to create the plan in.
    pub region: Region,
    /// Pricing tier.
    pub tier: PlanTier,
}

/// Identifies a function app by resource group and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppRef {
    /// Resource group containing the app.
    pub resource_group: String,
    /// App name.
    pub name: String,
}

impl AppRef {
    /// Create a new app reference.
    #[must_use]
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

/// The language/version/base-image triple a function app executes under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStack {
    /// Worker runtime (e.g. `python`, `node`).
    pub runtime: String,
    /// Functions host version (e.g. `~4`).
    pub version: String,
    /// Linux base image tag (e.g. `python|3.10`).
    pub linux_fx_version: String,
}

impl RuntimeStack {
    /// Create a runtime stack descriptor.
    #[must_use]
    pub fn new(
        runtime: impl Into<String>,
        version: impl Into<String>,
        linux_fx_version: impl Into<String>,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            version: version.into(),
            linux_fx_version: linux_fx_version.into(),
        }
    }
}

impl Default for RuntimeStack {
    fn default() -> Self {
        Self::new("python", "~4", "python|3.10")
    }
}

impl fmt::Display for RuntimeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.runtime, self.version, self.linux_fx_version
        )
    }
}

/// A public container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerImage(String);

impl ContainerImage {
    /// Create a new image reference.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self(image.into())
    }

    /// Get the image reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `linuxFxVersion` value selecting this image.
    #[must_use]
    pub fn linux_fx_version(&self) -> String {
        format!("DOCKER|{}", self.0)
    }
}

impl fmt::Display for ContainerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deployable serverless application bound to a hosting plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionApp {
    /// Provider resource ID.
    pub id: ResourceId,
    /// App name.
    pub name: String,
    /// Resource group containing the app.
    pub resource_group: String,
    /// Region the app runs in.
    pub region: Region,
    /// Hosting plan the app is bound to. Fixed at creation.
    pub plan_id: ResourceId,
    /// Runtime stack, if one is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeStack>,
    /// Container image, if the app runs from one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_image: Option<ContainerImage>,
    /// Name of the most recently deployed archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Public host name (e.g. `myapp.azurewebsites.net`).
    pub default_host_name: String,
}

impl FunctionApp {
    /// Reference to this app.
    #[must_use]
    pub fn app_ref(&self) -> AppRef {
        AppRef::new(self.resource_group.clone(), self.name.clone())
    }

    /// Base URL the app serves HTTP triggers on.
    #[must_use]
    pub fn base_url(&self, scheme: &str) -> String {
        format!("{scheme}://{}", self.default_host_name)
    }
}

/// Request to create a function app on an existing hosting plan.
#[derive(Debug, Clone)]
pub struct FunctionAppSpec {
    /// App name.
    pub name: String,
    /// Resource group to create the app in.
    pub resource_group: String,
    /// Region to create the app in.
    pub region: Region,
    /// Hosting plan the app will run on.
    pub plan_id: ResourceId,
    /// Initial runtime stack.
    pub runtime: Option<RuntimeStack>,
}

/// The kind of asynchronous transition an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Zip archive upload.
    ZipDeploy,
    /// Runtime stack swap.
    RuntimeSwitch,
    /// Container image swap.
    ContainerSwitch,
}

impl OperationKind {
    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ZipDeploy => "zip_deploy",
            Self::RuntimeSwitch => "runtime_switch",
            Self::ContainerSwitch => "container_switch",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle to an asynchronous operation issued against a function app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Client-side operation identifier.
    pub id: OperationId,
    /// What the operation does.
    pub kind: OperationKind,
    /// App the operation targets.
    pub app: AppRef,
    /// Status URL reported by the provider, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Value the app's configuration converges to once the operation lands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// When the operation was issued.
    pub issued_at: DateTime<Utc>,
}

impl OperationHandle {
    /// Create a handle for a freshly issued operation.
    #[must_use]
    pub fn new(kind: OperationKind, app: AppRef) -> Self {
        Self {
            id: OperationId::generate(),
            kind,
            app,
            location: None,
            target: None,
            issued_at: Utc::now(),
        }
    }

    /// Attach the provider's status URL.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attach the expected converged configuration value.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Remote status of an asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Accepted but not started.
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error reported by the provider.
    Failed(String),
}

impl OperationStatus {
    /// Whether the operation has stopped running.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}
