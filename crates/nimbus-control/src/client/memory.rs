//! In-memory management client for dry runs and testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult};
use crate::types::{
    AppRef, ContainerImage, FunctionApp, FunctionAppSpec, HostingPlan, OperationHandle,
    OperationId, OperationKind, OperationStatus, PlanSpec, PlanTier, Region, ResourceGroup,
    ResourceId, RuntimeStack,
};

use super::{Capability, ManagementClient};

const SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// How a simulated operation progresses when polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationBehaviour {
    /// Report completion on the given poll (1-based).
    CompleteAfter(u32),
    /// Report failure with a reason on the given poll (1-based).
    FailAfter(u32, String),
    /// Stay in progress forever.
    Never,
}

impl Default for OperationBehaviour {
    fn default() -> Self {
        Self::CompleteAfter(1)
    }
}

#[derive(Debug)]
enum Effect {
    Artifact(String),
    Runtime(RuntimeStack),
    Image(ContainerImage),
}

#[derive(Debug)]
struct SimOperation {
    app: AppRef,
    behaviour: OperationBehaviour,
    effect: Effect,
    polls: u32,
    applied: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    groups: HashMap<String, ResourceGroup>,
    plans: HashMap<ResourceId, HostingPlan>,
    apps: HashMap<AppRef, FunctionApp>,
    operations: HashMap<OperationId, SimOperation>,
    calls: Vec<Capability>,
    plans_created: usize,
}

/// In-memory management client.
///
/// Resources live only as long as the client. Failures can be injected per
/// capability and operation progress can be scripted per operation kind.
#[derive(Debug, Default)]
pub struct MemoryClient {
    state: RwLock<MemoryState>,
    behaviours: HashMap<OperationKind, OperationBehaviour>,
    failures: HashMap<Capability, String>,
    default_host: Option<String>,
}

impl MemoryClient {
    /// Create an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client pre-populated with every app the configuration targets.
    #[must_use]
    pub fn seeded_from(config: &DeployConfig) -> Self {
        let targets = [
            &config.targets.archive,
            &config.targets.runtime,
            &config.targets.container,
        ];

        targets
            .into_iter()
            .flatten()
            .fold(Self::new(), |client, target| {
                client.with_existing_app(existing_app(target, &config.provision.region))
            })
    }

    /// Seed an app that exists before the run, along with its group and plan.
    #[must_use]
    pub fn with_existing_app(self, app: FunctionApp) -> Self {
        if let Ok(mut state) = self.state.write() {
            state
                .groups
                .entry(app.resource_group.clone())
                .or_insert_with(|| ResourceGroup {
                    id: ResourceId::new(group_id(&app.resource_group)),
                    name: app.resource_group.clone(),
                    region: app.region.clone(),
                });
            state
                .plans
                .entry(app.plan_id.clone())
                .or_insert_with(|| HostingPlan {
                    id: app.plan_id.clone(),
                    name: app
                        .plan_id
                        .as_str()
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_owned(),
                    resource_group: app.resource_group.clone(),
                    region: app.region.clone(),
                    tier: PlanTier::Consumption,
                });
            state.apps.insert(app.app_ref(), app);
        }
        self
    }

    /// Script how operations of `kind` progress.
    #[must_use]
    pub fn with_behaviour(mut self, kind: OperationKind, behaviour: OperationBehaviour) -> Self {
        self.behaviours.insert(kind, behaviour);
        self
    }

    /// Make every call to `capability` fail with `reason`.
    #[must_use]
    pub fn failing(mut self, capability: Capability, reason: impl Into<String>) -> Self {
        self.failures.insert(capability, reason.into());
        self
    }

    /// Report `host` as the default host name of every app created from now on.
    #[must_use]
    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = Some(host.into());
        self
    }

    /// Every capability invoked so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Capability> {
        self.read().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of times `capability` was invoked.
    #[must_use]
    pub fn calls_to(&self, capability: Capability) -> usize {
        self.calls().into_iter().filter(|c| *c == capability).count()
    }

    /// Number of hosting plans created (not fetched) by this client.
    #[must_use]
    pub fn plans_created(&self) -> usize {
        self.read().map(|s| s.plans_created).unwrap_or_default()
    }

    /// Current state of an app.
    #[must_use]
    pub fn app(&self, app: &AppRef) -> Option<FunctionApp> {
        self.read().ok().and_then(|s| s.apps.get(app).cloned())
    }

    /// Names of all resource groups that currently exist.
    #[must_use]
    pub fn resource_groups(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .read()
            .map(|s| s.groups.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn read(&self) -> DeployResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| DeployError::internal("lock poisoned"))
    }

    fn write(&self) -> DeployResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| DeployError::internal("lock poisoned"))
    }

    /// Record the call, then fail it if a failure was injected.
    fn enter(&self, capability: Capability, subject: &str) -> DeployResult<()> {
        self.write()?.calls.push(capability);

        let Some(reason) = self.failures.get(&capability) else {
            return Ok(());
        };
        let reason = reason.clone();
        let subject = subject.to_owned();

        Err(match capability {
            Capability::CreateResourceGroup
            | Capability::CreateOrGetHostingPlan
            | Capability::CreateFunctionApp => DeployError::resource_creation(subject, reason),
            Capability::GetFunctionAppByName => DeployError::NotFound(format!("{subject}: {reason}")),
            Capability::DeployArchive => {
                DeployError::operation_failed(OperationKind::ZipDeploy, subject, reason)
            }
            Capability::SetRuntimeStack => {
                DeployError::operation_failed(OperationKind::RuntimeSwitch, subject, reason)
            }
            Capability::SetContainerImage => {
                DeployError::operation_failed(OperationKind::ContainerSwitch, subject, reason)
            }
            Capability::OperationStatus | Capability::DeleteResourceGroup => {
                DeployError::internal(format!("{subject}: {reason}"))
            }
        })
    }

    fn start_operation(
        &self,
        kind: OperationKind,
        app: &FunctionApp,
        effect: Effect,
    ) -> DeployResult<OperationHandle> {
        let mut state = self.write()?;
        let app_ref = app.app_ref();
        if !state.apps.contains_key(&app_ref) {
            return Err(DeployError::NotFound(format!("function app {app_ref}")));
        }

        let handle = OperationHandle::new(kind, app_ref.clone());
        state.operations.insert(
            handle.id.clone(),
            SimOperation {
                app: app_ref,
                behaviour: self.behaviours.get(&kind).cloned().unwrap_or_default(),
                effect,
                polls: 0,
                applied: false,
            },
        );
        Ok(handle)
    }
}

fn group_id(name: &str) -> String {
    format!("/subscriptions/{SUBSCRIPTION_ID}/resourceGroups/{name}")
}

fn plan_id(group: &str, name: &str) -> ResourceId {
    ResourceId::new(format!(
        "{}/providers/Microsoft.Web/serverfarms/{name}",
        group_id(group)
    ))
}

fn site_id(group: &str, name: &str) -> ResourceId {
    ResourceId::new(format!(
        "{}/providers/Microsoft.Web/sites/{name}",
        group_id(group)
    ))
}

fn existing_app(target: &AppRef, region: &Region) -> FunctionApp {
    FunctionApp {
        id: site_id(&target.resource_group, &target.name),
        name: target.name.clone(),
        resource_group: target.resource_group.clone(),
        region: region.clone(),
        plan_id: plan_id(&target.resource_group, &format!("{}-plan", target.name)),
        runtime: None,
        container_image: None,
        artifact: None,
        default_host_name: format!("{}.azurewebsites.net", target.name),
    }
}

#[async_trait]
impl ManagementClient for MemoryClient {
    fn subscription_id(&self) -> &str {
        SUBSCRIPTION_ID
    }

    async fn create_resource_group(
        &self,
        name: &str,
        region: &Region,
    ) -> DeployResult<ResourceGroup> {
        self.enter(Capability::CreateResourceGroup, name)?;

        let mut state = self.write()?;
        let group = state
            .groups
            .entry(name.to_owned())
            .or_insert_with(|| ResourceGroup {
                id: ResourceId::new(group_id(name)),
                name: name.to_owned(),
                region: region.clone(),
            });
        Ok(group.clone())
    }

    async fn create_or_get_hosting_plan(&self, spec: &PlanSpec) -> DeployResult<HostingPlan> {
        self.enter(Capability::CreateOrGetHostingPlan, &spec.name)?;

        let mut state = self.write()?;
        if !state.groups.contains_key(&spec.resource_group) {
            return Err(DeployError::resource_creation(
                format!("hosting plan {}", spec.name),
                format!("resource group {} does not exist", spec.resource_group),
            ));
        }

        let id = plan_id(&spec.resource_group, &spec.name);
        if let Some(existing) = state.plans.get(&id) {
            return Ok(existing.clone());
        }

        let plan = HostingPlan {
            id: id.clone(),
            name: spec.name.clone(),
            resource_group: spec.resource_group.clone(),
            region: spec.region.clone(),
            tier: spec.tier,
        };
        state.plans.insert(id, plan.clone());
        state.plans_created += 1;
        Ok(plan)
    }

    async fn create_function_app(&self, spec: &FunctionAppSpec) -> DeployResult<FunctionApp> {
        self.enter(Capability::CreateFunctionApp, &spec.name)?;

        let mut state = self.write()?;
        let resource = format!("function app {}", spec.name);
        if !state.groups.contains_key(&spec.resource_group) {
            return Err(DeployError::resource_creation(
                resource,
                format!("resource group {} does not exist", spec.resource_group),
            ));
        }
        if !state.plans.contains_key(&spec.plan_id) {
            return Err(DeployError::resource_creation(
                resource,
                format!("hosting plan {} does not exist", spec.plan_id),
            ));
        }

        let app_ref = AppRef::new(spec.resource_group.clone(), spec.name.clone());
        if state.apps.contains_key(&app_ref) {
            return Err(DeployError::resource_creation(resource, "name already in use"));
        }

        let app = FunctionApp {
            id: site_id(&spec.resource_group, &spec.name),
            name: spec.name.clone(),
            resource_group: spec.resource_group.clone(),
            region: spec.region.clone(),
            plan_id: spec.plan_id.clone(),
            runtime: spec.runtime.clone(),
            container_image: None,
            artifact: None,
            default_host_name: self
                .default_host
                .clone()
                .unwrap_or_else(|| format!("{}.azurewebsites.net", spec.name)),
        };
        state.apps.insert(app_ref, app.clone());
        Ok(app)
    }

    async fn get_function_app_by_name(&self, app: &AppRef) -> DeployResult<FunctionApp> {
        self.enter(Capability::GetFunctionAppByName, &app.name)?;

        self.read()?
            .apps
            .get(app)
            .cloned()
            .ok_or_else(|| DeployError::NotFound(format!("function app {app}")))
    }

    async fn deploy_archive(
        &self,
        app: &FunctionApp,
        archive: &Path,
    ) -> DeployResult<OperationHandle> {
        self.enter(Capability::DeployArchive, &app.name)?;

        let artifact = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.display().to_string());
        self.start_operation(OperationKind::ZipDeploy, app, Effect::Artifact(artifact))
    }

    async fn set_runtime_stack(
        &self,
        app: &FunctionApp,
        stack: &RuntimeStack,
    ) -> DeployResult<OperationHandle> {
        self.enter(Capability::SetRuntimeStack, &app.name)?;

        let handle = self.start_operation(
            OperationKind::RuntimeSwitch,
            app,
            Effect::Runtime(stack.clone()),
        )?;
        Ok(handle.with_target(stack.linux_fx_version.clone()))
    }

    async fn set_container_image(
        &self,
        app: &FunctionApp,
        image: &ContainerImage,
    ) -> DeployResult<OperationHandle> {
        self.enter(Capability::SetContainerImage, &app.name)?;

        let handle = self.start_operation(
            OperationKind::ContainerSwitch,
            app,
            Effect::Image(image.clone()),
        )?;
        Ok(handle.with_target(image.linux_fx_version()))
    }

    async fn operation_status(&self, handle: &OperationHandle) -> DeployResult<OperationStatus> {
        self.enter(Capability::OperationStatus, handle.id.as_str())?;

        let mut state = self.write()?;
        let MemoryState {
            operations, apps, ..
        } = &mut *state;

        let op = operations
            .get_mut(&handle.id)
            .ok_or_else(|| DeployError::NotFound(format!("operation {}", handle.id)))?;
        op.polls += 1;

        let status = match &op.behaviour {
            OperationBehaviour::CompleteAfter(n) if op.polls >= *n => OperationStatus::Completed,
            OperationBehaviour::FailAfter(n, reason) if op.polls >= *n => {
                OperationStatus::Failed(reason.clone())
            }
            _ => OperationStatus::InProgress,
        };

        if status == OperationStatus::Completed && !op.applied {
            op.applied = true;
            if let Some(app) = apps.get_mut(&op.app) {
                match &op.effect {
                    Effect::Artifact(name) => app.artifact = Some(name.clone()),
                    Effect::Runtime(stack) => {
                        app.runtime = Some(stack.clone());
                        app.container_image = None;
                    }
                    Effect::Image(image) => app.container_image = Some(image.clone()),
                }
            }
        }

        Ok(status)
    }

    async fn delete_resource_group(&self, name: &str) -> DeployResult<()> {
        self.enter(Capability::DeleteResourceGroup, name)?;

        let mut state = self.write()?;
        if state.groups.remove(name).is_none() {
            return Err(DeployError::NotFound(format!("resource group {name}")));
        }
        state.plans.retain(|_, plan| plan.resource_group != name);
        state.apps.retain(|app_ref, _| app_ref.resource_group != name);
        Ok(())
    }
}
