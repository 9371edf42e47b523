//! Typestate model of asynchronous operations and the await-with-timeout
//! primitive built on top of it.
//!
//! An operation moves through a fixed set of states:
//!
//! ```text
//! Pending ──▶ InProgress ──▶ Completed
//!    │            │
//!    │            ├──▶ Failed
//!    ▼            ▼
//! TimedOut     TimedOut
//! ```
//!
//! Invalid transitions are caught at compile time. [`await_completion`] polls
//! a [`ManagementClient`] until the remote operation settles or the
//! [`WaitPolicy`] bound elapses. A timeout only stops waiting; the remote
//! operation is not cancelled.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::client::ManagementClient;
use crate::error::{DeployError, DeployResult};
use crate::types::{AppRef, OperationHandle, OperationKind, OperationStatus};

// =============================================================================
// State marker types (zero-sized)
// =============================================================================

/// Marker trait for operation states.
pub trait OperationState: private::Sealed + Send + Sync {
    /// Get the state name for logs and error messages.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Issued, not yet observed running.
#[derive(Debug, Clone, Copy)]
pub struct Pending;

/// Observed running on the provider side.
#[derive(Debug, Clone, Copy)]
pub struct InProgress;

/// Finished successfully.
#[derive(Debug, Clone, Copy)]
pub struct Completed;

/// Finished with a provider-reported error.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

/// Stopped waiting before the operation settled.
#[derive(Debug, Clone, Copy)]
pub struct TimedOut;

impl private::Sealed for Pending {}
impl private::Sealed for InProgress {}
impl private::Sealed for Completed {}
impl private::Sealed for Failed {}
impl private::Sealed for TimedOut {}

impl OperationState for Pending {
    fn name() -> &'static str {
        "pending"
    }
}

impl OperationState for InProgress {
    fn name() -> &'static str {
        "in_progress"
    }
}

impl OperationState for Completed {
    fn name() -> &'static str {
        "completed"
    }
}

impl OperationState for Failed {
    fn name() -> &'static str {
        "failed"
    }
}

impl OperationState for TimedOut {
    fn name() -> &'static str {
        "timed_out"
    }
}

// =============================================================================
// Operation struct parameterised by state
// =============================================================================

/// An asynchronous operation in a specific state.
#[derive(Debug)]
pub struct Operation<S: OperationState> {
    handle: OperationHandle,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    _state: PhantomData<S>,
}

impl<S: OperationState> Operation<S> {
    /// Get the underlying handle.
    #[must_use]
    pub const fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    /// What the operation does.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.handle.kind
    }

    /// App the operation targets.
    #[must_use]
    pub const fn app(&self) -> &AppRef {
        &self.handle.app
    }

    /// Get the state name.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        S::name()
    }

    /// Error reported by the provider, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// When the operation reached its current terminal state.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Convert into the underlying handle (consuming the operation).
    #[must_use]
    pub fn into_handle(self) -> OperationHandle {
        self.handle
    }

    fn transition<T: OperationState>(self) -> Operation<T> {
        Operation {
            handle: self.handle,
            finished_at: self.finished_at,
            error: self.error,
            _state: PhantomData,
        }
    }

    fn finish<T: OperationState>(mut self, error: Option<String>) -> Operation<T> {
        self.finished_at = Some(Utc::now());
        self.error = error;
        self.transition()
    }
}

impl Operation<Pending> {
    /// Track a freshly issued operation.
    #[must_use]
    pub const fn issue(handle: OperationHandle) -> Self {
        Self {
            handle,
            finished_at: None,
            error: None,
            _state: PhantomData,
        }
    }

    /// Transition to the in-progress state.
    #[must_use]
    pub fn begin(self) -> Operation<InProgress> {
        self.transition()
    }

    /// Stop waiting before the operation was ever seen running.
    #[must_use]
    pub fn time_out(self) -> Operation<TimedOut> {
        self.finish(None)
    }
}

impl Operation<InProgress> {
    /// Transition to the completed state.
    #[must_use]
    pub fn complete(self) -> Operation<Completed> {
        self.finish(None)
    }

    /// Transition to the failed state.
    #[must_use]
    pub fn fail(self, reason: String) -> Operation<Failed> {
        self.finish(Some(reason))
    }

    /// Stop waiting while the operation is still running.
    #[must_use]
    pub fn time_out(self) -> Operation<TimedOut> {
        self.finish(None)
    }
}

impl Operation<Completed> {
    /// Wall-clock time between issue and completion.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.handle.issued_at
    }
}

// =============================================================================
// Await with timeout
// =============================================================================

/// Bounds applied while waiting for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Upper bound on the whole wait.
    pub timeout: Duration,
    /// Delay between status polls.
    pub poll_interval: Duration,
}

impl WaitPolicy {
    /// Create a wait policy.
    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(5))
    }
}

/// Why waiting for an operation did not end in completion.
#[derive(Debug)]
pub enum WaitError {
    /// The provider reported the operation as failed.
    Failed(Operation<Failed>),
    /// The operation did not settle within the policy bound.
    TimedOut {
        /// The abandoned operation.
        operation: Operation<TimedOut>,
        /// Bound that elapsed.
        after: Duration,
    },
    /// Polling itself failed.
    Client(DeployError),
}

impl WaitError {
    /// Map onto the deployment error taxonomy.
    #[must_use]
    pub fn into_deploy_error(self) -> DeployError {
        match self {
            Self::Failed(op) => DeployError::operation_failed(
                op.kind(),
                op.app().name.clone(),
                op.error().unwrap_or("operation failed").to_owned(),
            ),
            Self::TimedOut { operation, after } => DeployError::DeploymentTimeout {
                app: operation.app().name.clone(),
                operation: operation.kind(),
                timeout: after,
            },
            Self::Client(e) => e,
        }
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(op) => write!(
                f,
                "{} on {} failed: {}",
                op.kind(),
                op.app(),
                op.error().unwrap_or("operation failed")
            ),
            Self::TimedOut { operation, after } => write!(
                f,
                "{} on {} timed out after {after:?}",
                operation.kind(),
                operation.app()
            ),
            Self::Client(e) => write!(f, "{e}"),
        }
    }
}

impl From<WaitError> for DeployError {
    fn from(err: WaitError) -> Self {
        err.into_deploy_error()
    }
}

enum Settled {
    Completed,
    Failed(String),
}

/// Wait for an operation to settle, bounded by `policy.timeout`.
pub async fn await_completion<C: ManagementClient + ?Sized>(
    client: &C,
    handle: OperationHandle,
    policy: &WaitPolicy,
) -> Result<Operation<Completed>, WaitError> {
    let pending = Operation::<Pending>::issue(handle);
    let mut last = OperationStatus::Pending;

    debug!(
        operation = %pending.handle().id,
        kind = %pending.kind(),
        app = %pending.app(),
        timeout = ?policy.timeout,
        "waiting for operation"
    );

    let polled = tokio::time::timeout(
        policy.timeout,
        poll_until_settled(client, pending.handle(), policy.poll_interval, &mut last),
    )
    .await;

    match polled {
        Ok(Ok(Settled::Completed)) => {
            let completed = pending.begin().complete();
            info!(
                operation = %completed.handle().id,
                kind = %completed.kind(),
                app = %completed.app(),
                elapsed_ms = completed.elapsed().num_milliseconds(),
                "operation completed"
            );
            Ok(completed)
        }
        Ok(Ok(Settled::Failed(reason))) => {
            warn!(
                operation = %pending.handle().id,
                kind = %pending.kind(),
                app = %pending.app(),
                reason = %reason,
                "operation failed"
            );
            Err(WaitError::Failed(pending.begin().fail(reason)))
        }
        Ok(Err(e)) => Err(WaitError::Client(e)),
        Err(_) => {
            let operation = match last {
                OperationStatus::Pending => pending.time_out(),
                _ => pending.begin().time_out(),
            };
            warn!(
                operation = %operation.handle().id,
                kind = %operation.kind(),
                app = %operation.app(),
                timeout = ?policy.timeout,
                "operation timed out"
            );
            Err(WaitError::TimedOut {
                operation,
                after: policy.timeout,
            })
        }
    }
}

async fn poll_until_settled<C: ManagementClient + ?Sized>(
    client: &C,
    handle: &OperationHandle,
    poll_interval: Duration,
    last: &mut OperationStatus,
) -> DeployResult<Settled> {
    loop {
        let status = client.operation_status(handle).await?;
        if status != *last {
            debug!(operation = %handle.id, status = ?status, "operation status changed");
        }

        match status {
            OperationStatus::Completed => return Ok(Settled::Completed),
            OperationStatus::Failed(reason) => return Ok(Settled::Failed(reason)),
            other => *last = other,
        }

        tokio::time::sleep(poll_interval).await;
    }
}
