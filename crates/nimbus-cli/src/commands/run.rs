//! Implementation of the `nimbus run` command.

use std::path::PathBuf;

use nimbus_control::config::ClientKind;
use nimbus_control::{create_client, DeployError, Orchestrator, StepFailure};
use thiserror::Error;
use tracing::info;

use super::load_config;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("could not start the run: {0}")]
    Setup(#[from] DeployError),

    #[error(transparent)]
    Step(#[from] StepFailure),
}

/// Arguments for the run command.
#[derive(Debug, Default)]
pub struct RunArgs {
    /// Configuration file override.
    pub config: Option<PathBuf>,

    /// Use the in-memory client.
    pub dry_run: bool,
}

pub async fn run(args: RunArgs) -> Result<(), RunError> {
    let mut config = load_config(args.config.as_deref())?;

    if args.dry_run {
        info!("dry run: using the in-memory client");
        config.client.kind = ClientKind::Memory;
        // Simulated apps have no reachable host.
        config.smoke_test.enabled = false;
        config.deploy.settle_secs = 0;
    }

    config.validate()?;

    let client = create_client(&config).await?;
    let report = Orchestrator::new(client, config).run().await?;

    println!();
    println!("Run completed in subscription {}", report.subscription_id);
    println!("  resource group: {}", report.names.resource_group);
    println!("  app #1:         {}", report.names.primary_app);
    println!("  app #2:         {}", report.names.secondary_app);
    println!("  hosting plan:   {}", report.plan_id);
    if let Some(smoke) = &report.smoke {
        println!("  smoke test:     {} -> {}", smoke.url, smoke.response);
    }
    println!();
    for outcome in &report.outcomes {
        println!(
            "  {}. {:<22} {:>6}s",
            outcome.step.number(),
            outcome.step.as_str(),
            outcome.elapsed().num_seconds()
        );
    }
    if !report.teardown.retained.is_empty() {
        println!();
        println!("Left in place: {}", report.teardown.retained.join(", "));
    }

    Ok(())
}
