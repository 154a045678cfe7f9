//! Idempotent start and stop.

use tracing::{debug, info};

use crate::openstack::{ComputeApi, ServerStatus};
use crate::resolver::resolve_one;
use crate::scope::OwnershipScope;

use super::{LifecycleError, Orchestrator};

#[derive(Clone, Copy, Debug)]
enum PowerAction {
    Start,
    Stop,
}

impl PowerAction {
    const fn desired(self) -> ServerStatus {
        match self {
            Self::Start => ServerStatus::Active,
            Self::Stop => ServerStatus::Shutoff,
        }
    }

    const fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl<C> Orchestrator<C>
where
    C: ComputeApi + Clone + 'static,
{
    /// Powers on the single server matching `name_or_id`. A server that is
    /// already `ACTIVE` is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Resolve`] when the server cannot be resolved
    /// to exactly one match and [`LifecycleError::Remote`] when the action is
    /// rejected.
    pub async fn start(
        &self,
        name_or_id: &str,
        scope: &OwnershipScope,
    ) -> Result<(), LifecycleError> {
        self.power(name_or_id, scope, PowerAction::Start).await
    }

    /// Powers off the single server matching `name_or_id`. A server that is
    /// already `SHUTOFF` is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Resolve`] when the server cannot be resolved
    /// to exactly one match and [`LifecycleError::Remote`] when the action is
    /// rejected.
    pub async fn stop(
        &self,
        name_or_id: &str,
        scope: &OwnershipScope,
    ) -> Result<(), LifecycleError> {
        self.power(name_or_id, scope, PowerAction::Stop).await
    }

    async fn power(
        &self,
        name_or_id: &str,
        scope: &OwnershipScope,
        action: PowerAction,
    ) -> Result<(), LifecycleError> {
        let server = resolve_one(&self.api, name_or_id, scope).await?;
        if server.status == action.desired() {
            debug!(server_id = %server.id, status = %server.status, "server already in desired state");
            return Ok(());
        }
        let outcome = match action {
            PowerAction::Start => self.api.start_server(&server.id).await,
            PowerAction::Stop => self.api.stop_server(&server.id).await,
        };
        outcome.map_err(|source| LifecycleError::Remote {
            operation: action.verb(),
            server_id: server.id.clone(),
            source,
        })?;
        info!(server_id = %server.id, action = action.verb(), "power action requested");
        Ok(())
    }
}
