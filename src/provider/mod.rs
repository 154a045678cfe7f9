//! Caller-facing provider operations.
//!
//! [`OpenStackProvider`] wires the overlay engine, identity resolver,
//! lifecycle orchestrator and mapper together behind the
//! [`ExternalProvider`] surface the runner-pool manager drives.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ConfigError, ProviderConfig};
use crate::credentials::load_cloud;
use crate::execution::{ExternalProvider, ProviderFuture};
use crate::lifecycle::{LifecycleError, Orchestrator};
use crate::mapper::to_instance;
use crate::openstack::{ApiError, ComputeApi, OpenStackClient};
use crate::overlay::{BuildDefaults, Collaborators, OverlayError, compose};
use crate::params::{BootstrapInstance, ProviderInstance};
use crate::resolver::{
    ResolveError, list_scoped, resolve_flavor, resolve_image, resolve_network, resolve_one,
};
use crate::userdata::{
    CloudConfigRenderer, DefaultCloudConfigRenderer, ForgeToolFetcher, ToolFetcher,
};

/// Exit code reported when the target instance does not exist.
pub const EXIT_CODE_NOT_FOUND: i32 = 30;

/// Exit code reported when a name matches several instances.
pub const EXIT_CODE_DUPLICATE: i32 = 31;

/// Errors surfaced to the runner-pool manager.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Static configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The request or its override document is invalid.
    #[error("invalid request: {0}")]
    Validation(String),
    /// No instance matched.
    #[error("{0}")]
    NotFound(String),
    /// Several instances matched where one was required.
    #[error("{0}")]
    AmbiguousMatch(String),
    /// A status wait exceeded its bound.
    #[error("{0}")]
    Timeout(String),
    /// The server entered the `ERROR` state.
    #[error("{0}")]
    ErrorState(String),
    /// The operation was cancelled.
    #[error("{0}")]
    Cancelled(String),
    /// The resolved image belongs to an owner outside the allowlist.
    #[error("image owner {owner} is not allowed, allowed owners: {}", .allowed.join(", "))]
    ImageOwnerNotAllowed {
        /// Owner of the resolved image.
        owner: String,
        /// Configured allowlist.
        allowed: Vec<String>,
    },
    /// The remote API failed.
    #[error("{0}")]
    Remote(String),
}

impl ProviderError {
    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => EXIT_CODE_NOT_FOUND,
            Self::AmbiguousMatch(_) => EXIT_CODE_DUPLICATE,
            _ => 1,
        }
    }
}

impl From<OverlayError> for ProviderError {
    fn from(value: OverlayError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<ApiError> for ProviderError {
    fn from(value: ApiError) -> Self {
        if value.is_not_found() {
            Self::NotFound(value.to_string())
        } else {
            Self::Remote(value.to_string())
        }
    }
}

impl From<ResolveError> for ProviderError {
    fn from(value: ResolveError) -> Self {
        let message = value.to_string();
        match value {
            ResolveError::NotFound { .. } => Self::NotFound(message),
            ResolveError::Ambiguous { .. } => Self::AmbiguousMatch(message),
            ResolveError::Api { .. } => Self::Remote(message),
        }
    }
}

impl From<LifecycleError> for ProviderError {
    fn from(value: LifecycleError) -> Self {
        let message = value.to_string();
        match value {
            LifecycleError::Resolve(inner) => inner.into(),
            LifecycleError::Timeout { .. } => Self::Timeout(message),
            LifecycleError::ErrorState { .. } => Self::ErrorState(message),
            LifecycleError::Cancelled { .. } => Self::Cancelled(message),
            LifecycleError::Vanished { .. }
            | LifecycleError::Submit { .. }
            | LifecycleError::Remote { .. } => Self::Remote(message),
        }
    }
}

/// OpenStack implementation of [`ExternalProvider`].
pub struct OpenStackProvider<C> {
    orchestrator: Orchestrator<C>,
    defaults: BuildDefaults,
    tools: Arc<dyn ToolFetcher>,
    renderer: Arc<dyn CloudConfigRenderer>,
}

impl OpenStackProvider<OpenStackClient> {
    /// Validates `config`, loads the configured cloud's credentials and
    /// authenticates against it.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] when configuration or credentials
    /// are invalid and [`ProviderError::Remote`] when authentication fails.
    pub async fn connect(
        config: &ProviderConfig,
        controller_id: &str,
    ) -> Result<Self, ProviderError> {
        config.validate()?;
        let cloud = load_cloud(&config.credential_files(), &config.cloud)
            .map_err(ConfigError::from)?;
        let client = OpenStackClient::connect(&cloud).await?;
        debug!(cloud = %config.cloud, "authenticated against cloud");
        Ok(Self::new(client, config, controller_id))
    }
}

impl<C> OpenStackProvider<C>
where
    C: ComputeApi + Clone + 'static,
{
    /// Creates a provider acting for `controller_id` with the default
    /// tool-selection and rendering strategies.
    #[must_use]
    pub fn new(api: C, config: &ProviderConfig, controller_id: &str) -> Self {
        Self {
            orchestrator: Orchestrator::new(api, controller_id)
                .with_wait_timeout(config.wait_timeout())
                .with_poll_interval(config.poll_interval()),
            defaults: BuildDefaults::from(config),
            tools: Arc::new(ForgeToolFetcher),
            renderer: Arc::new(DefaultCloudConfigRenderer),
        }
    }

    /// Replaces the tool-selection and rendering strategies.
    #[must_use]
    pub fn with_collaborators(
        mut self,
        tools: Arc<dyn ToolFetcher>,
        renderer: Arc<dyn CloudConfigRenderer>,
    ) -> Self {
        self.tools = tools;
        self.renderer = renderer;
        self
    }

    /// Overrides the status wait bound and poll interval.
    #[must_use]
    pub fn with_timing(mut self, wait_timeout: Duration, poll_interval: Duration) -> Self {
        self.orchestrator = self
            .orchestrator
            .with_wait_timeout(wait_timeout)
            .with_poll_interval(poll_interval);
        self
    }

    /// Ties status polling to `cancel`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.orchestrator = self.orchestrator.with_cancellation(cancel);
        self
    }

    async fn create(&self, bootstrap: BootstrapInstance) -> Result<ProviderInstance, ProviderError> {
        let spec = compose(
            &self.defaults,
            bootstrap,
            self.orchestrator.owner().controller_id(),
            Collaborators {
                tools: self.tools.as_ref(),
                renderer: self.renderer.as_ref(),
            },
        )?;
        let api = self.orchestrator.api();
        let flavor = resolve_flavor(api, &spec.flavor).await?;
        let network = resolve_network(api, &spec.network_id).await?;
        let image = resolve_image(api, &spec.image, spec.image_visibility.as_deref()).await?;
        if !spec.allows_image_owner(&image) {
            return Err(ProviderError::ImageOwnerNotAllowed {
                owner: image.owner.clone().unwrap_or_default(),
                allowed: spec.allowed_image_owners.clone(),
            });
        }

        let request = spec.server_request(&flavor, &image, &network);
        info!(
            instance = %request.name,
            flavor = %flavor.id,
            image = %image.id,
            network = %network.id,
            boot_from_volume = spec.boot_from_volume,
            "creating server"
        );
        let server = self.orchestrator.create(&request).await?;
        Ok(to_instance(&server))
    }

    async fn get(&self, instance: &str) -> Result<ProviderInstance, ProviderError> {
        let server = resolve_one(self.orchestrator.api(), instance, self.orchestrator.owner()).await?;
        Ok(to_instance(&server))
    }

    async fn list(&self, pool_id: &str) -> Result<Vec<ProviderInstance>, ProviderError> {
        let scope = self.orchestrator.owner().clone().with_pool(pool_id);
        let servers = list_scoped(self.orchestrator.api(), &scope).await?;
        Ok(servers.iter().map(to_instance).collect())
    }
}

impl<C> ExternalProvider for OpenStackProvider<C>
where
    C: ComputeApi + Clone + 'static,
{
    fn create_instance(&self, bootstrap: BootstrapInstance) -> ProviderFuture<'_, ProviderInstance> {
        Box::pin(self.create(bootstrap))
    }

    fn delete_instance<'a>(&'a self, instance: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.orchestrator
                .delete(instance, self.orchestrator.owner(), true)
                .await?;
            Ok(())
        })
    }

    fn get_instance<'a>(&'a self, instance: &'a str) -> ProviderFuture<'a, ProviderInstance> {
        Box::pin(self.get(instance))
    }

    fn list_instances<'a>(&'a self, pool_id: &'a str) -> ProviderFuture<'a, Vec<ProviderInstance>> {
        Box::pin(self.list(pool_id))
    }

    fn remove_all_instances(&self) -> ProviderFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn stop<'a>(&'a self, instance: &'a str, _force: bool) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.orchestrator
                .stop(instance, self.orchestrator.owner())
                .await?;
            Ok(())
        })
    }

    fn start<'a>(&'a self, instance: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.orchestrator
                .start(instance, self.orchestrator.owner())
                .await?;
            Ok(())
        })
    }
}
