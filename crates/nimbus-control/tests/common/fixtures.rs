//! Test fixtures for pipeline integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nimbus_control::types::{FunctionAppSpec, PlanSpec, ResourceId};
use nimbus_control::{
    AppRef, ContainerImage, DeployResult, FunctionApp, HostingPlan, ManagementClient, MemoryClient,
    OperationHandle, OperationStatus, Region, ResourceGroup, RuntimeStack,
};

/// Client that places every app after the first on a different plan.
///
/// Simulates a provider that ignores the requested plan.
pub struct PlanSwappingClient {
    inner: Arc<MemoryClient>,
    created: AtomicUsize,
}

impl PlanSwappingClient {
    /// Wraps an in-memory client.
    pub fn new(inner: Arc<MemoryClient>) -> Self {
        Self {
            inner,
            created: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ManagementClient for PlanSwappingClient {
    fn subscription_id(&self) -> &str {
        self.inner.subscription_id()
    }

    async fn create_resource_group(
        &self,
        name: &str,
        region: &Region,
    ) -> DeployResult<ResourceGroup> {
        self.inner.create_resource_group(name, region).await
    }

    async fn create_or_get_hosting_plan(&self, spec: &PlanSpec) -> DeployResult<HostingPlan> {
        self.inner.create_or_get_hosting_plan(spec).await
    }

    async fn create_function_app(&self, spec: &FunctionAppSpec) -> DeployResult<FunctionApp> {
        let mut app = self.inner.create_function_app(spec).await?;
        if self.created.fetch_add(1, Ordering::SeqCst) > 0 {
            app.plan_id = ResourceId::new(format!("{}-other", app.plan_id));
        }
        Ok(app)
    }

    async fn get_function_app_by_name(&self, app: &AppRef) -> DeployResult<FunctionApp> {
        self.inner.get_function_app_by_name(app).await
    }

    async fn deploy_archive(
        &self,
        app: &FunctionApp,
        archive: &Path,
    ) -> DeployResult<OperationHandle> {
        self.inner.deploy_archive(app, archive).await
    }

    async fn set_runtime_stack(
        &self,
        app: &FunctionApp,
        stack: &RuntimeStack,
    ) -> DeployResult<OperationHandle> {
        self.inner.set_runtime_stack(app, stack).await
    }

    async fn set_container_image(
        &self,
        app: &FunctionApp,
        image: &ContainerImage,
    ) -> DeployResult<OperationHandle> {
        self.inner.set_container_image(app, image).await
    }

    async fn operation_status(&self, handle: &OperationHandle) -> DeployResult<OperationStatus> {
        self.inner.operation_status(handle).await
    }

    async fn delete_resource_group(&self, name: &str) -> DeployResult<()> {
        self.inner.delete_resource_group(name).await
    }
}
