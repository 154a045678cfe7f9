//! Server creation with compensating delete on failure.

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::openstack::{ComputeApi, ManagedServer, ServerCreateRequest, ServerStatus};
use crate::resolver::resolve_one;

use super::{LifecycleError, Orchestrator};

/// Removes a partially created server unless disarmed.
///
/// The target starts as the requested name and switches to the cloud's
/// identifier once one is known. Dropping an armed guard spawns the
/// rollback on the current runtime.
struct RollbackGuard<C>
where
    C: ComputeApi + Clone + 'static,
{
    orchestrator: Option<Orchestrator<C>>,
    target: String,
}

impl<C> RollbackGuard<C>
where
    C: ComputeApi + Clone + 'static,
{
    fn arm(orchestrator: Orchestrator<C>, name: &str) -> Self {
        Self {
            orchestrator: Some(orchestrator),
            target: name.to_owned(),
        }
    }

    fn retarget(&mut self, server_id: &str) {
        server_id.clone_into(&mut self.target);
    }

    fn disarm(mut self) {
        self.orchestrator = None;
    }

    async fn run(mut self) {
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.rollback(&self.target).await;
        }
    }
}

impl<C> Drop for RollbackGuard<C>
where
    C: ComputeApi + Clone + 'static,
{
    fn drop(&mut self) {
        let Some(orchestrator) = self.orchestrator.take() else {
            return;
        };
        let target = std::mem::take(&mut self.target);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { orchestrator.rollback(&target).await });
            }
            Err(err) => {
                warn!(instance = %target, error = %err, "no runtime available to roll back server");
            }
        }
    }
}

impl<C> Orchestrator<C>
where
    C: ComputeApi + Clone + 'static,
{
    /// Submits `request`, waits for `ACTIVE` and returns the fresh record.
    ///
    /// On any failure after submission was attempted, the partial server is
    /// deleted: by the identifier the cloud returned when there is one,
    /// otherwise by the requested name. Rollback ignores cancellation and
    /// its own failures are logged, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Submit`] when the build is rejected and the
    /// errors of [`Orchestrator::wait_for_status`] when the server never
    /// becomes active.
    pub async fn create(
        &self,
        request: &ServerCreateRequest,
    ) -> Result<ManagedServer, LifecycleError> {
        if self.cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled {
                target: request.name.clone(),
            });
        }
        let mut rollback = RollbackGuard::arm(self.detached(), &request.name);
        match self.submit_and_wait(request, &mut rollback).await {
            Ok(server) => {
                rollback.disarm();
                info!(instance = %request.name, server_id = %server.id, "server is active");
                Ok(server)
            }
            Err(err) => {
                warn!(instance = %request.name, error = %err, "server creation failed, rolling back");
                rollback.run().await;
                Err(err)
            }
        }
    }

    async fn submit_and_wait(
        &self,
        request: &ServerCreateRequest,
        rollback: &mut RollbackGuard<C>,
    ) -> Result<ManagedServer, LifecycleError> {
        let server_id = match self.api.create_server(request).await {
            Ok(server_id) => server_id,
            Err(source) => {
                if let Some(partial) = source.partial_resource_id() {
                    rollback.retarget(partial);
                }
                return Err(LifecycleError::Submit {
                    name: request.name.clone(),
                    source,
                });
            }
        };
        rollback.retarget(&server_id);
        info!(instance = %request.name, %server_id, "server submitted");

        self.wait_for_status(&server_id, ServerStatus::Active)
            .await?;
        Ok(resolve_one(&self.api, &server_id, &self.owner).await?)
    }

    async fn rollback(&self, target: &str) {
        info!(instance = target, "removing partially created server");
        if let Err(err) = self.delete(target, &self.owner, true).await {
            warn!(instance = target, error = %err, "rollback failed");
        }
    }
}
