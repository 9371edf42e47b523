//! The ordered provisioning and deployment workflow.
//!
//! A run executes seven [`Step`]s strictly in order. The first failing step
//! aborts the run and is reported as a [`StepFailure`](crate::error::StepFailure);
//! resources created before it are handed to [`Teardown`](crate::teardown::Teardown)
//! either way.

mod orchestrator;

pub use orchestrator::Orchestrator;

use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::config::DeployConfig;
use crate::smoke::SmokeOutcome;
use crate::teardown::TeardownReport;
use crate::types::ResourceId;

/// Format used for wall-clock timestamps in logs.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Current local time formatted for logs.
#[must_use]
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Generate names for the new apps and resource group.
    GenerateNames,
    /// Create the resource group, hosting plan and first app.
    CreatePrimaryApp,
    /// Create the second app on the first app's plan.
    CreateSecondaryApp,
    /// Zip deploy to the second app and smoke test it.
    ZipDeploySecondary,
    /// Zip deploy to a pre-existing app.
    ZipDeployExisting,
    /// Switch a pre-existing app's runtime stack.
    SwitchRuntime,
    /// Switch a pre-existing app to a container image.
    SwitchContainer,
}

impl Step {
    /// Every step, in execution order.
    pub const ALL: [Self; 7] = [
        Self::GenerateNames,
        Self::CreatePrimaryApp,
        Self::CreateSecondaryApp,
        Self::ZipDeploySecondary,
        Self::ZipDeployExisting,
        Self::SwitchRuntime,
        Self::SwitchContainer,
    ];

    /// 1-based position in the run.
    #[must_use]
    pub const fn number(&self) -> u8 {
        match self {
            Self::GenerateNames => 1,
            Self::CreatePrimaryApp => 2,
            Self::CreateSecondaryApp => 3,
            Self::ZipDeploySecondary => 4,
            Self::ZipDeployExisting => 5,
            Self::SwitchRuntime => 6,
            Self::SwitchContainer => 7,
        }
    }

    /// Get the step identifier as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateNames => "generate-names",
            Self::CreatePrimaryApp => "create-primary-app",
            Self::CreateSecondaryApp => "create-secondary-app",
            Self::ZipDeploySecondary => "zip-deploy-secondary",
            Self::ZipDeployExisting => "zip-deploy-existing",
            Self::SwitchRuntime => "switch-runtime",
            Self::SwitchContainer => "switch-container",
        }
    }

    /// What the step will do under `config`.
    #[must_use]
    pub fn describe(&self, config: &DeployConfig) -> String {
        fn target(app: Option<&crate::types::AppRef>) -> String {
            app.map_or_else(|| "<unset>".to_owned(), ToString::to_string)
        }

        let naming = &config.naming;
        let provision = &config.provision;
        match self {
            Self::GenerateNames => format!(
                "name apps {}* and {}* in group {}*",
                naming.primary_app_prefix,
                naming.secondary_app_prefix,
                naming.resource_group_prefix
            ),
            Self::CreatePrimaryApp => format!(
                "create group, {} plan and app #1 in {}",
                provision.plan_tier, provision.region
            ),
            Self::CreateSecondaryApp => "create app #2 on app #1's plan and group".to_owned(),
            Self::ZipDeploySecondary => format!(
                "deploy {} to app #2{}",
                config.deploy.primary_archive.display(),
                if config.smoke_test.enabled {
                    format!(", then POST {} to {}", config.smoke_test.input, config.smoke_test.path)
                } else {
                    String::new()
                }
            ),
            Self::ZipDeployExisting => format!(
                "deploy {} to {}, then wait {}s",
                config.deploy.secondary_archive.display(),
                target(config.targets.archive.as_ref()),
                config.deploy.settle_secs
            ),
            Self::SwitchRuntime => format!(
                "switch {} to {}",
                target(config.targets.runtime.as_ref()),
                config.runtime_switch
            ),
            Self::SwitchContainer => format!(
                "switch {} to image {}",
                target(config.targets.container.as_ref()),
                config
                    .container
                    .image
                    .as_ref()
                    .map_or("<unset>", |image| image.as_str())
            ),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Names generated for the resources a run creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedNames {
    /// First new function app.
    pub primary_app: String,
    /// Second new function app.
    pub secondary_app: String,
    /// New resource group.
    pub resource_group: String,
    /// Hosting plan shared by both new apps.
    pub hosting_plan: String,
}

/// Timing of a completed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// Step that completed.
    pub step: Step,
    /// When the step started.
    pub started_at: DateTime<Utc>,
    /// When the step finished.
    pub finished_at: DateTime<Utc>,
}

impl StepOutcome {
    /// Wall-clock duration of the step.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Subscription the run operated in.
    pub subscription_id: String,
    /// Generated resource names.
    pub names: GeneratedNames,
    /// Hosting plan shared by the new apps.
    pub plan_id: ResourceId,
    /// Per-step timing, in execution order.
    pub outcomes: Vec<StepOutcome>,
    /// Smoke test result, if the smoke test ran.
    pub smoke: Option<SmokeOutcome>,
    /// What teardown did.
    pub teardown: TeardownReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_numbered_in_order() {
        for (i, step) in Step::ALL.iter().enumerate() {
            assert_eq!(usize::from(step.number()), i + 1);
        }
    }

    #[test]
    fn step_identifiers() {
        assert_eq!(Step::SwitchRuntime.to_string(), "switch-runtime");
        assert_eq!(
            serde_json::to_value(Step::ZipDeployExisting).unwrap_or_default(),
            serde_json::json!("zip-deploy-existing")
        );
    }

    #[test]
    fn describe_reports_unset_targets() {
        let config = DeployConfig::default();
        assert!(Step::SwitchContainer.describe(&config).contains("<unset>"));
        assert!(Step::ZipDeploySecondary.describe(&config).contains("/api/square"));
    }

    #[test]
    fn timestamp_format() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), "2024/01/01 00:00:00".len());
        assert_eq!(&stamp[4..5], "/");
    }
}
