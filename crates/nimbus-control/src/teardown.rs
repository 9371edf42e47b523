//! Tracking and release of resources created during a run.

use tracing::{info, warn};

use crate::client::ManagementClient;
use crate::config::CleanupConfig;

/// What [`Teardown::release`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Resource groups that were deleted.
    pub deleted: Vec<String>,
    /// Resource groups left in place.
    pub retained: Vec<String>,
    /// Resource groups whose deletion failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl TeardownReport {
    /// Whether every tracked resource was dealt with as configured.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resource groups created by a run, in creation order.
#[derive(Debug, Clone, Default)]
pub struct Teardown {
    resource_groups: Vec<String>,
    delete_created: bool,
}

impl Teardown {
    /// Create an empty teardown list.
    #[must_use]
    pub fn new(config: &CleanupConfig) -> Self {
        Self {
            resource_groups: Vec::new(),
            delete_created: config.delete_created,
        }
    }

    /// Record a resource group created by this run.
    pub fn track_resource_group(&mut self, name: impl Into<String>) {
        self.resource_groups.push(name.into());
    }

    /// Resource groups tracked so far.
    #[must_use]
    pub fn resource_groups(&self) -> &[String] {
        &self.resource_groups
    }

    /// Delete or report the tracked resources.
    ///
    /// Deletion runs newest first and keeps going past failures.
    pub async fn release(self, client: &dyn ManagementClient) -> TeardownReport {
        let mut report = TeardownReport::default();

        if self.resource_groups.is_empty() {
            info!("no resources created, no clean-up necessary");
            return report;
        }

        if !self.delete_created {
            for group in self.resource_groups {
                info!(resource_group = %group, "leaving resource group in place");
                report.retained.push(group);
            }
            return report;
        }

        for group in self.resource_groups.into_iter().rev() {
            info!(resource_group = %group, "deleting resource group");
            match client.delete_resource_group(&group).await {
                Ok(()) => {
                    info!(resource_group = %group, "deleted resource group");
                    report.deleted.push(group);
                }
                Err(e) => {
                    warn!(resource_group = %group, error = %e, "failed to delete resource group");
                    report.failed.push((group, e.to_string()));
                }
            }
        }

        report
    }
}
