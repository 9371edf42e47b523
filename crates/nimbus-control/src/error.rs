//! Error types for nimbus-control.

use std::time::Duration;

use crate::pipeline::Step;
use crate::types::OperationKind;

/// Result type alias using [`DeployError`].
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that can occur while provisioning or deploying.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// No credential source produced a usable token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A resource group, hosting plan or function app could not be created.
    #[error("failed to create {resource}: {reason}")]
    ResourceCreation {
        /// Resource that was being created.
        resource: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// A zip deployment failed.
    #[error("deployment to {app} failed: {reason}")]
    Deployment {
        /// Target app.
        app: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// An asynchronous operation did not complete within its time bound.
    #[error("{operation} on {app} did not complete within {timeout:?}")]
    DeploymentTimeout {
        /// Target app.
        app: String,
        /// Operation that timed out.
        operation: OperationKind,
        /// Time bound that elapsed.
        timeout: Duration,
    },

    /// A runtime stack switch failed.
    #[error("runtime switch on {app} failed: {reason}")]
    RuntimeSwitch {
        /// Target app.
        app: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// A container image switch failed.
    #[error("container switch on {app} failed: {reason}")]
    ContainerSwitch {
        /// Target app.
        app: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// The deployed app did not answer the smoke test as expected.
    #[error("smoke test failed: {0}")]
    SmokeTest(String),

    /// A referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A generated or configured name violates platform constraints.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Which constraint failed.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Create a resource creation error.
    #[must_use]
    pub fn resource_creation(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceCreation {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Error for an operation the provider reported as failed.
    ///
    /// The variant depends on what the operation was doing.
    #[must_use]
    pub fn operation_failed(
        kind: OperationKind,
        app: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let app = app.into();
        let reason = reason.into();
        match kind {
            OperationKind::ZipDeploy => Self::Deployment { app, reason },
            OperationKind::RuntimeSwitch => Self::RuntimeSwitch { app, reason },
            OperationKind::ContainerSwitch => Self::ContainerSwitch { app, reason },
        }
    }

    /// Whether this error is a timeout rather than a reported failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::DeploymentTimeout { .. })
    }
}

/// The first failure of a pipeline run, tagged with the step it came from.
#[derive(Debug, thiserror::Error)]
#[error("step {} ({}) failed: {error}", step.number(), step.as_str())]
pub struct StepFailure {
    /// Step that failed.
    pub step: Step,
    /// Underlying error.
    #[source]
    pub error: DeployError,
}

impl StepFailure {
    /// Tag an error with the step it came from.
    #[must_use]
    pub const fn new(step: Step, error: DeployError) -> Self {
        Self { step, error }
    }
}
