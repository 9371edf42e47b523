//! Common test utilities for pipeline integration tests.

pub mod fixtures;

use std::sync::Arc;

use nimbus_control::{AppRef, ContainerImage, DeployConfig, MemoryClient, NameGenerator};

/// App that receives the secondary archive.
pub fn archive_target() -> AppRef {
    AppRef::new("rg-existing", "python-app")
}

/// App whose runtime stack is switched.
pub fn runtime_target() -> AppRef {
    AppRef::new("rg-existing", "runtime-app")
}

/// App switched to a container image.
pub fn container_target() -> AppRef {
    AppRef::new("rg-existing", "container-app")
}

/// Configuration with every target set and all delays removed.
pub fn test_config() -> DeployConfig {
    let mut config = DeployConfig::default();
    config.targets.archive = Some(archive_target());
    config.targets.runtime = Some(runtime_target());
    config.targets.container = Some(container_target());
    config.container.image = Some(ContainerImage::new("acme/square-python:1.0"));
    config.deploy.settle_secs = 0;
    config.deploy.poll_interval_secs = 1;
    config.smoke_test.enabled = false;
    config.smoke_test.warmup_secs = 0;
    config
}

/// In-memory client and the configuration it was seeded from.
pub struct TestRun {
    pub config: DeployConfig,
    pub client: Arc<MemoryClient>,
}

impl TestRun {
    /// Creates a run against a client seeded with the configured targets.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a run with custom configuration.
    pub fn with_config(config: DeployConfig) -> Self {
        let client = Arc::new(MemoryClient::seeded_from(&config));
        Self { config, client }
    }

    /// Creates a run whose client is customised by `build`.
    pub fn with_client(build: impl FnOnce(MemoryClient) -> MemoryClient) -> Self {
        let config = test_config();
        let client = Arc::new(build(MemoryClient::seeded_from(&config)));
        Self { config, client }
    }

    /// Deterministic name generator.
    pub fn names() -> NameGenerator {
        NameGenerator::seeded(926)
    }
}

impl Default for TestRun {
    fn default() -> Self {
        Self::new()
    }
}
