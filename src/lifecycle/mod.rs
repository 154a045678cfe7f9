//! Lifecycle orchestration for managed servers.
//!
//! [`Orchestrator`] drives a build from submission to `ACTIVE`, removing the
//! partial server when anything on the way fails, and implements the
//! idempotent delete, start and stop actions on top of the identity
//! resolver.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::openstack::{ApiError, ComputeApi, ServerStatus};
use crate::resolver::ResolveError;
use crate::scope::OwnershipScope;

mod create;
mod delete;
mod power;
mod wait;

/// Default upper bound on every status wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Errors raised while driving a server through its lifecycle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// The server did not reach the target status before the deadline.
    #[error("server {server_id} did not reach {target} state after {waited_secs} seconds")]
    Timeout {
        /// Server being polled.
        server_id: String,
        /// Status that was awaited.
        target: ServerStatus,
        /// Configured wait bound.
        waited_secs: u64,
    },
    /// The server entered `ERROR` while being polled.
    #[error("server {server_id} entered ERROR state while waiting for {target}")]
    ErrorState {
        /// Server being polled.
        server_id: String,
        /// Status that was awaited.
        target: ServerStatus,
    },
    /// The server disappeared while waiting for a status other than removal.
    #[error("server {server_id} disappeared while waiting for {target}")]
    Vanished {
        /// Server being polled.
        server_id: String,
        /// Status that was awaited.
        target: ServerStatus,
    },
    /// The caller cancelled the operation.
    #[error("operation on {target} was cancelled")]
    Cancelled {
        /// Server name or identifier the operation targeted.
        target: String,
    },
    /// The build request was rejected.
    #[error("failed to create server {name}: {source}")]
    Submit {
        /// Requested server name.
        name: String,
        /// Underlying failure.
        source: ApiError,
    },
    /// A remote call on an existing server failed.
    #[error("failed to {operation} server {server_id}: {source}")]
    Remote {
        /// Action being performed.
        operation: &'static str,
        /// Server the action targeted.
        server_id: String,
        /// Underlying failure.
        source: ApiError,
    },
    /// The target could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Drives create, delete and power actions against a [`ComputeApi`].
///
/// The orchestrator holds no per-server state. `owner` is the controller
/// scope used for status polling and for create rollback; callers pass
/// their own scope to delete, start and stop.
#[derive(Clone, Debug)]
pub struct Orchestrator<C> {
    api: C,
    owner: OwnershipScope,
    wait_timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<C> Orchestrator<C>
where
    C: ComputeApi + Clone + 'static,
{
    /// Creates an orchestrator acting on behalf of `controller_id`.
    #[must_use]
    pub fn new(api: C, controller_id: &str) -> Self {
        Self {
            api,
            owner: OwnershipScope::controller(controller_id),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    /// Overrides the wait bound.
    #[must_use]
    pub const fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Overrides the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Ties status polling to `cancel`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The remote API this orchestrator drives.
    #[must_use]
    pub const fn api(&self) -> &C {
        &self.api
    }

    /// Controller scope used for polling and rollback.
    #[must_use]
    pub const fn owner(&self) -> &OwnershipScope {
        &self.owner
    }

    /// Copy that ignores the caller's cancellation, used for compensating
    /// actions.
    fn detached(&self) -> Self {
        Self {
            api: self.api.clone(),
            owner: self.owner.clone(),
            wait_timeout: self.wait_timeout,
            poll_interval: self.poll_interval,
            cancel: CancellationToken::new(),
        }
    }
}
