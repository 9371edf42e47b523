//! Sequential execution of the pipeline steps.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::client::ManagementClient;
use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult, StepFailure};
use crate::naming::{self, NameGenerator, ResourceKind};
use crate::operation::WaitPolicy;
use crate::smoke::{SmokeOutcome, SmokeTest};
use crate::teardown::Teardown;
use crate::types::{AppRef, FunctionApp, FunctionAppSpec, HostingPlan, OperationHandle, PlanSpec};

use super::{timestamp, GeneratedNames, RunReport, Step, StepOutcome};

/// Drives one run of the workflow against a management client.
pub struct Orchestrator {
    client: Arc<dyn ManagementClient>,
    config: DeployConfig,
    names: NameGenerator,
}

/// Run a step, logging its boundaries and recording its timing.
async fn stage<T, F>(step: Step, outcomes: &mut Vec<StepOutcome>, work: F) -> Result<T, StepFailure>
where
    F: Future<Output = DeployResult<T>>,
{
    let started_at = Utc::now();
    info!(step = %step, number = step.number(), at = %timestamp(), "step started");

    match work.await {
        Ok(value) => {
            info!(step = %step, at = %timestamp(), "step completed");
            outcomes.push(StepOutcome {
                step,
                started_at,
                finished_at: Utc::now(),
            });
            Ok(value)
        }
        Err(e) => {
            error!(step = %step, at = %timestamp(), error = %e, "step failed");
            Err(StepFailure::new(step, e))
        }
    }
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(client: Arc<dyn ManagementClient>, config: DeployConfig) -> Self {
        Self {
            client,
            config,
            names: NameGenerator::new(),
        }
    }

    /// Use a specific name generator.
    #[must_use]
    pub fn with_name_generator(mut self, names: NameGenerator) -> Self {
        self.names = names;
        self
    }

    /// Execute every step in order.
    ///
    /// Resources created before a failure are released (or reported) before
    /// the failure is returned.
    pub async fn run(mut self) -> Result<RunReport, StepFailure> {
        info!(subscription = %self.client.subscription_id(), "selected subscription");

        let mut teardown = Teardown::new(&self.config.cleanup);
        let result = self.execute(&mut teardown).await;
        let teardown = teardown.release(self.client.as_ref()).await;

        result.map(|mut report| {
            report.teardown = teardown;
            info!(steps = report.outcomes.len(), "run completed");
            report
        })
    }

    async fn execute(&mut self, teardown: &mut Teardown) -> Result<RunReport, StepFailure> {
        let mut outcomes = Vec::with_capacity(Step::ALL.len());

        let names = stage(Step::GenerateNames, &mut outcomes, async {
            self.generate_names()
        })
        .await?;

        let (primary, plan) = stage(
            Step::CreatePrimaryApp,
            &mut outcomes,
            self.create_primary_app(&names, teardown),
        )
        .await?;

        let secondary = stage(
            Step::CreateSecondaryApp,
            &mut outcomes,
            self.create_secondary_app(&names, &primary, &plan),
        )
        .await?;

        let smoke = stage(
            Step::ZipDeploySecondary,
            &mut outcomes,
            self.zip_deploy_secondary(&secondary),
        )
        .await?;

        stage(
            Step::ZipDeployExisting,
            &mut outcomes,
            self.zip_deploy_existing(),
        )
        .await?;

        stage(Step::SwitchRuntime, &mut outcomes, self.switch_runtime()).await?;

        stage(Step::SwitchContainer, &mut outcomes, self.switch_container()).await?;

        Ok(RunReport {
            subscription_id: self.client.subscription_id().to_owned(),
            names,
            plan_id: plan.id,
            outcomes,
            smoke,
            teardown: Default::default(),
        })
    }

    fn wait_policy(&self) -> WaitPolicy {
        self.config.wait_policy()
    }

    fn generate_names(&mut self) -> DeployResult<GeneratedNames> {
        let naming = &self.config.naming;
        let primary_app = self.names.random_name(
            ResourceKind::FunctionApp,
            &naming.primary_app_prefix,
            naming.app_name_max_len,
        )?;
        let secondary_app = self.names.random_name(
            ResourceKind::FunctionApp,
            &naming.secondary_app_prefix,
            naming.app_name_max_len,
        )?;
        let resource_group = self.names.random_name(
            ResourceKind::ResourceGroup,
            &naming.resource_group_prefix,
            naming.resource_group_max_len,
        )?;

        let hosting_plan = plan_name(&primary_app, &self.config.provision.plan_suffix);
        naming::validate(ResourceKind::HostingPlan, &hosting_plan)?;

        info!(
            primary_app = %primary_app,
            secondary_app = %secondary_app,
            resource_group = %resource_group,
            hosting_plan = %hosting_plan,
            "generated names"
        );

        Ok(GeneratedNames {
            primary_app,
            secondary_app,
            resource_group,
            hosting_plan,
        })
    }

    async fn create_primary_app(
        &self,
        names: &GeneratedNames,
        teardown: &mut Teardown,
    ) -> DeployResult<(FunctionApp, HostingPlan)> {
        let provision = &self.config.provision;

        let group = self
            .client
            .create_resource_group(&names.resource_group, &provision.region)
            .await?;
        teardown.track_resource_group(group.name.clone());
        info!(resource_group = %group.name, region = %group.region, "created resource group");

        let plan = self
            .client
            .create_or_get_hosting_plan(&PlanSpec {
                name: names.hosting_plan.clone(),
                resource_group: group.name.clone(),
                region: provision.region.clone(),
                tier: provision.plan_tier,
            })
            .await?;
        info!(plan = %plan.name, plan_id = %plan.id, tier = %plan.tier, "hosting plan ready");

        let app = self
            .client
            .create_function_app(&FunctionAppSpec {
                name: names.primary_app.clone(),
                resource_group: group.name.clone(),
                region: provision.region.clone(),
                plan_id: plan.id.clone(),
                runtime: Some(provision.runtime.clone()),
            })
            .await?;
        info!(app = %app.name, host = %app.default_host_name, "created function app #1");

        Ok((app, plan))
    }

    async fn create_secondary_app(
        &self,
        names: &GeneratedNames,
        primary: &FunctionApp,
        plan: &HostingPlan,
    ) -> DeployResult<FunctionApp> {
        let app = self
            .client
            .create_function_app(&FunctionAppSpec {
                name: names.secondary_app.clone(),
                resource_group: primary.resource_group.clone(),
                region: primary.region.clone(),
                plan_id: primary.plan_id.clone(),
                runtime: Some(self.config.provision.runtime.clone()),
            })
            .await?;

        if app.plan_id != plan.id || app.resource_group != primary.resource_group {
            return Err(DeployError::resource_creation(
                format!("function app {}", app.name),
                format!(
                    "expected plan {} in group {}, got plan {} in group {}",
                    plan.id, primary.resource_group, app.plan_id, app.resource_group
                ),
            ));
        }

        info!(
            app = %app.name,
            plan_id = %app.plan_id,
            resource_group = %app.resource_group,
            "created function app #2 on the existing plan"
        );
        Ok(app)
    }

    async fn deploy_and_wait(&self, app: &FunctionApp, archive: &Path) -> DeployResult<()> {
        info!(app = %app.name, archive = %archive.display(), at = %timestamp(), "deploying archive");
        let handle = self.client.deploy_archive(app, archive).await?;
        let done = self
            .client
            .await_completion(handle, &self.wait_policy())
            .await?;
        info!(
            app = %app.name,
            at = %timestamp(),
            elapsed_secs = done.elapsed().num_seconds(),
            "deployment finished"
        );
        Ok(())
    }

    async fn zip_deploy_secondary(&self, app: &FunctionApp) -> DeployResult<Option<SmokeOutcome>> {
        self.deploy_and_wait(app, &self.config.deploy.primary_archive)
            .await?;

        let smoke = SmokeTest::new(&self.config.smoke_test)?;
        if !smoke.enabled() {
            info!("smoke test disabled");
            return Ok(None);
        }

        let outcome = smoke.run(app).await?;
        info!(app = %app.name, response = %outcome.response, "smoke test passed");
        Ok(Some(outcome))
    }

    fn target(&self, step: Step) -> DeployResult<&AppRef> {
        let targets = &self.config.targets;
        let target = match step {
            Step::ZipDeployExisting => targets.archive.as_ref(),
            Step::SwitchRuntime => targets.runtime.as_ref(),
            Step::SwitchContainer => targets.container.as_ref(),
            _ => None,
        };
        target.ok_or_else(|| DeployError::config(format!("no target app configured for {step}")))
    }

    async fn zip_deploy_existing(&self) -> DeployResult<()> {
        let target = self.target(Step::ZipDeployExisting)?;
        let app = self.client.get_function_app_by_name(target).await?;

        self.deploy_and_wait(&app, &self.config.deploy.secondary_archive)
            .await?;

        let settle = Duration::from_secs(self.config.deploy.settle_secs);
        if !settle.is_zero() {
            info!(settle_secs = settle.as_secs(), "waiting for the deployment to settle");
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    /// Wait for a switch and confirm the app stayed on its plan and group.
    async fn await_switch(
        &self,
        app: &FunctionApp,
        handle: OperationHandle,
    ) -> DeployResult<FunctionApp> {
        let kind = handle.kind;
        self.client
            .await_completion(handle, &self.wait_policy())
            .await?;

        let after = self.client.get_function_app_by_name(&app.app_ref()).await?;
        if after.plan_id != app.plan_id || after.resource_group != app.resource_group {
            return Err(DeployError::operation_failed(
                kind,
                app.name.clone(),
                "hosting plan or resource group changed",
            ));
        }
        Ok(after)
    }

    async fn switch_runtime(&self) -> DeployResult<()> {
        let target = self.target(Step::SwitchRuntime)?;
        let app = self.client.get_function_app_by_name(target).await?;
        let stack = &self.config.runtime_switch;

        info!(app = %app.name, stack = %stack, at = %timestamp(), "switching runtime stack");
        let handle = self.client.set_runtime_stack(&app, stack).await?;
        self.await_switch(&app, handle).await?;
        info!(app = %app.name, at = %timestamp(), "runtime stack switched");
        Ok(())
    }

    async fn switch_container(&self) -> DeployResult<()> {
        let target = self.target(Step::SwitchContainer)?;
        let image = self
            .config
            .container
            .image
            .as_ref()
            .ok_or_else(|| DeployError::config("no container image configured"))?;
        let app = self.client.get_function_app_by_name(target).await?;

        info!(app = %app.name, image = %image, at = %timestamp(), "switching to container image");
        let handle = self.client.set_container_image(&app, image).await?;
        self.await_switch(&app, handle).await?;
        info!(app = %app.name, at = %timestamp(), "container image switched");
        Ok(())
    }
}

/// Plan named after the primary app, shortened to fit the plan limit.
fn plan_name(primary_app: &str, suffix: &str) -> String {
    let room = ResourceKind::HostingPlan
        .max_len()
        .saturating_sub(suffix.len())
        .min(primary_app.len());
    format!("{}{suffix}", &primary_app[..room])
}
