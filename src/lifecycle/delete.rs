//! Idempotent server removal.

use tracing::{debug, info, warn};

use crate::openstack::{ComputeApi, ServerStatus};
use crate::resolver::{ResolveError, resolve};
use crate::scope::OwnershipScope;

use super::{LifecycleError, Orchestrator};

impl<C> Orchestrator<C>
where
    C: ComputeApi + Clone + 'static,
{
    /// Force-deletes every server in `scope` matching `name_or_id`.
    ///
    /// A name may match several servers; all of them are deleted. Nothing
    /// matching, or a server vanishing before its delete lands, counts as
    /// success. With `wait` set, each delete is followed by a bounded wait
    /// for the server to disappear.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Resolve`] when the lookup fails,
    /// [`LifecycleError::Remote`] when a delete is rejected and the errors of
    /// [`Orchestrator::wait_for_status`] while waiting.
    pub async fn delete(
        &self,
        name_or_id: &str,
        scope: &OwnershipScope,
        wait: bool,
    ) -> Result<(), LifecycleError> {
        let matches = match resolve(&self.api, name_or_id, scope).await {
            Ok(matches) => matches,
            Err(ResolveError::Api { source, .. }) if source.is_not_found() => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        if matches.is_empty() {
            debug!(instance = name_or_id, "no matching server, nothing to delete");
            return Ok(());
        }
        if matches.len() > 1 {
            warn!(instance = name_or_id, count = matches.len(), "deleting every server sharing this name");
        }
        for server in matches {
            self.delete_by_id(&server.id, wait).await?;
        }
        Ok(())
    }

    async fn delete_by_id(&self, server_id: &str, wait: bool) -> Result<(), LifecycleError> {
        match self.api.force_delete_server(server_id).await {
            Ok(()) => info!(server_id, "server delete requested"),
            Err(source) if source.is_not_found() => {
                debug!(server_id, "server already gone");
                return Ok(());
            }
            Err(source) => {
                return Err(LifecycleError::Remote {
                    operation: "delete",
                    server_id: server_id.to_owned(),
                    source,
                });
            }
        }
        if wait {
            self.wait_for_status(server_id, ServerStatus::Deleted).await?;
        }
        Ok(())
    }
}
