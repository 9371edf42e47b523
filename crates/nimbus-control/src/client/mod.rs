//! Resource management client abstraction.
//!
//! The orchestrator talks to the cloud provider only through the
//! [`ManagementClient`] capability trait. Two implementations are provided:
//! [`ArmClient`], a thin REST adapter for the provider's management API, and
//! [`MemoryClient`], an in-memory simulation used for dry runs and tests.

mod arm;
mod memory;

pub use arm::ArmClient;
pub use memory::{MemoryClient, OperationBehaviour};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{ClientKind, DeployConfig};
use crate::credential::DefaultCredential;
use crate::error::DeployResult;
use crate::operation::{self, Completed, Operation, WaitError, WaitPolicy};
use crate::types::{
    AppRef, ContainerImage, FunctionApp, FunctionAppSpec, HostingPlan, OperationHandle,
    OperationStatus, PlanSpec, Region, ResourceGroup, RuntimeStack,
};

/// Capabilities exposed by a management client.
///
/// Used for call logs and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// [`ManagementClient::create_resource_group`].
    CreateResourceGroup,
    /// [`ManagementClient::create_or_get_hosting_plan`].
    CreateOrGetHostingPlan,
    /// [`ManagementClient::create_function_app`].
    CreateFunctionApp,
    /// [`ManagementClient::get_function_app_by_name`].
    GetFunctionAppByName,
    /// [`ManagementClient::deploy_archive`].
    DeployArchive,
    /// [`ManagementClient::set_runtime_stack`].
    SetRuntimeStack,
    /// [`ManagementClient::set_container_image`].
    SetContainerImage,
    /// [`ManagementClient::operation_status`].
    OperationStatus,
    /// [`ManagementClient::delete_resource_group`].
    DeleteResourceGroup,
}

impl Capability {
    /// Get the capability name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateResourceGroup => "create_resource_group",
            Self::CreateOrGetHostingPlan => "create_or_get_hosting_plan",
            Self::CreateFunctionApp => "create_function_app",
            Self::GetFunctionAppByName => "get_function_app_by_name",
            Self::DeployArchive => "deploy_archive",
            Self::SetRuntimeStack => "set_runtime_stack",
            Self::SetContainerImage => "set_container_image",
            Self::OperationStatus => "operation_status",
            Self::DeleteResourceGroup => "delete_resource_group",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for resource management client implementations.
///
/// Mutating calls return once the provider has accepted the request.
/// Deployment-style calls return an [`OperationHandle`] that must be awaited
/// with [`ManagementClient::await_completion`].
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Subscription the client operates in.
    fn subscription_id(&self) -> &str;

    /// Create a resource group, or return it if it already exists.
    async fn create_resource_group(&self, name: &str, region: &Region)
        -> DeployResult<ResourceGroup>;

    /// Create a hosting plan, or return the existing plan with the same name.
    async fn create_or_get_hosting_plan(&self, spec: &PlanSpec) -> DeployResult<HostingPlan>;

    /// Create a function app on an existing hosting plan.
    async fn create_function_app(&self, spec: &FunctionAppSpec) -> DeployResult<FunctionApp>;

    /// Look up an app by resource group and name.
    async fn get_function_app_by_name(&self, app: &AppRef) -> DeployResult<FunctionApp>;

    /// Start a zip deployment of `archive` to `app`.
    async fn deploy_archive(&self, app: &FunctionApp, archive: &Path)
        -> DeployResult<OperationHandle>;

    /// Start switching `app` to a different runtime stack.
    async fn set_runtime_stack(
        &self,
        app: &FunctionApp,
        stack: &RuntimeStack,
    ) -> DeployResult<OperationHandle>;

    /// Start switching `app` to run from a public container image.
    async fn set_container_image(
        &self,
        app: &FunctionApp,
        image: &ContainerImage,
    ) -> DeployResult<OperationHandle>;

    /// Poll the remote status of an operation.
    async fn operation_status(&self, handle: &OperationHandle) -> DeployResult<OperationStatus>;

    /// Delete a resource group and everything in it.
    async fn delete_resource_group(&self, name: &str) -> DeployResult<()>;

    /// Wait for an operation to settle, bounded by `policy`.
    async fn await_completion(
        &self,
        handle: OperationHandle,
        policy: &WaitPolicy,
    ) -> Result<Operation<Completed>, WaitError> {
        operation::await_completion(self, handle, policy).await
    }
}

/// Create a management client from configuration.
pub async fn create_client(config: &DeployConfig) -> DeployResult<Arc<dyn ManagementClient>> {
    match config.client.kind {
        ClientKind::Arm => {
            let credential = Arc::new(DefaultCredential::from_config(&config.cloud)?);
            let client = ArmClient::connect(&config.cloud, credential)
                .await?
                .with_storage_connection(config.provision.storage_connection.clone());
            info!(subscription = %client.subscription_id(), "using management API");
            Ok(Arc::new(client))
        }
        ClientKind::Memory => {
            info!("using in-memory management client");
            Ok(Arc::new(MemoryClient::seeded_from(config)))
        }
    }
}
