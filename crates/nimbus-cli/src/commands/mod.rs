//! Subcommand implementations.

pub mod check;
pub mod run;

use std::path::Path;

use nimbus_control::{DeployConfig, DeployResult};

/// Load configuration from `path`, or from `deploy.toml` when unset.
fn load_config(path: Option<&Path>) -> DeployResult<DeployConfig> {
    path.map_or_else(DeployConfig::load, DeployConfig::from_file)
}
