//! Bounded status polling.

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::openstack::{ComputeApi, ServerStatus};
use crate::resolver::lookup_owned;

use super::{LifecycleError, Orchestrator};

impl<C> Orchestrator<C>
where
    C: ComputeApi + Clone + 'static,
{
    /// Polls `server_id` until it reports `target`.
    ///
    /// Waiting for [`ServerStatus::Deleted`] also succeeds once the server
    /// can no longer be found.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ErrorState`] when the server enters
    /// `ERROR`, [`LifecycleError::Timeout`] once the wait bound elapses,
    /// [`LifecycleError::Cancelled`] when the cancellation token fires and
    /// [`LifecycleError::Remote`] when a poll fails.
    pub async fn wait_for_status(
        &self,
        server_id: &str,
        target: ServerStatus,
    ) -> Result<(), LifecycleError> {
        // A bound too large to represent never expires.
        let deadline = Instant::now().checked_add(self.wait_timeout);
        loop {
            let polled = tokio::select! {
                () = self.cancel.cancelled() => return Err(self.cancelled(server_id)),
                polled = lookup_owned(&self.api, server_id, &self.owner) => polled,
            };
            let current = polled.map_err(|source| LifecycleError::Remote {
                operation: "poll",
                server_id: server_id.to_owned(),
                source,
            })?;

            match current {
                None if target == ServerStatus::Deleted => return Ok(()),
                None => {
                    return Err(LifecycleError::Vanished {
                        server_id: server_id.to_owned(),
                        target,
                    });
                }
                Some(server) if server.status == target => return Ok(()),
                Some(server) if server.status == ServerStatus::Error => {
                    return Err(LifecycleError::ErrorState {
                        server_id: server_id.to_owned(),
                        target,
                    });
                }
                Some(server) => {
                    debug!(
                        server_id,
                        status = %server.status,
                        task_state = server.task_state.as_deref().unwrap_or("none"),
                        awaited = %target,
                        "waiting for server status"
                    );
                }
            }

            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return Err(LifecycleError::Timeout {
                    server_id: server_id.to_owned(),
                    target,
                    waited_secs: self.wait_timeout.as_secs(),
                });
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Err(self.cancelled(server_id)),
                () = sleep(self.poll_interval) => {}
            }
        }
    }

    fn cancelled(&self, target: &str) -> LifecycleError {
        debug!(instance = target, timeout = ?self.wait_timeout, "status wait cancelled");
        LifecycleError::Cancelled {
            target: target.to_owned(),
        }
    }
}
