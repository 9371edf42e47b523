//! Nimbus Deployment Control
//!
//! This crate provisions serverless function apps and drives them through a
//! fixed sequence of deployment operations against a cloud resource
//! management API.
//!
//! # Architecture
//!
//! - **Pipeline**: [`Orchestrator`] runs seven ordered [`Step`]s and reports
//!   the first failure as a [`StepFailure`] naming the step
//! - **Management client**: every remote call goes through the
//!   [`ManagementClient`] trait, implemented by [`ArmClient`] (REST) and
//!   [`MemoryClient`] (in-memory, for dry runs and tests)
//! - **Operations**: zip deploys and runtime/container switches return an
//!   [`OperationHandle`] that is awaited with a bounded [`WaitPolicy`]
//! - **Teardown**: resource groups created by a run are tracked and released
//!   once the run ends, whatever the outcome
//!
//! # Operation State Machine
//!
//! Awaited operations follow a typestate machine:
//!
//! ```text
//! Pending ──▶ InProgress ──▶ Completed
//!    │             │
//!    ▼             ├──▶ Failed
//!  TimedOut ◀──────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nimbus_control::{DeployConfig, MemoryClient, Orchestrator};
//!
//! let config = DeployConfig::load()?;
//! let client = Arc::new(MemoryClient::seeded_from(&config));
//!
//! let report = Orchestrator::new(client, config).run().await?;
//! println!("plan shared by both apps: {}", report.plan_id);
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod naming;
pub mod operation;
pub mod pipeline;
pub mod smoke;
pub mod teardown;
pub mod types;

// Re-export commonly used types at the crate root
pub use client::{create_client, ArmClient, Capability, ManagementClient, MemoryClient};
pub use config::DeployConfig;
pub use credential::{DefaultCredential, TokenCredential};
pub use error::{DeployError, DeployResult, StepFailure};
pub use naming::{NameGenerator, ResourceKind};
pub use operation::{
    await_completion, Completed, Failed, InProgress, Operation, OperationState, Pending, TimedOut,
    WaitError, WaitPolicy,
};
pub use pipeline::{Orchestrator, RunReport, Step, StepOutcome};
pub use smoke::{SmokeOutcome, SmokeTest};
pub use teardown::{Teardown, TeardownReport};
pub use types::{
    AppRef, ContainerImage, FunctionApp, HostingPlan, OperationHandle, OperationKind,
    OperationStatus, PlanTier, Region, ResourceGroup, RuntimeStack,
};
