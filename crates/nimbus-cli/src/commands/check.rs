//! Implementation of the `nimbus check` command.

use std::path::PathBuf;

use nimbus_control::{DeployResult, Step};

use super::load_config;

pub fn run(config: Option<PathBuf>) -> DeployResult<()> {
    let config = load_config(config.as_deref())?;
    config.validate()?;

    println!("Configuration OK");
    println!("  client:  {:?}", config.client.kind);
    println!("  region:  {}", config.provision.region);
    println!(
        "  timeout: {}s (poll every {}s)",
        config.deploy.timeout_secs, config.deploy.poll_interval_secs
    );
    println!(
        "  cleanup: {}",
        if config.cleanup.delete_created {
            "delete created resource groups"
        } else {
            "report only"
        }
    );
    println!();

    for step in Step::ALL {
        println!("  {}. {:<22} {}", step.number(), step.as_str(), step.describe(&config));
    }

    Ok(())
}
