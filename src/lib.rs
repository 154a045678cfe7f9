//! OpenStack external provider for the GARM runner-pool manager.
//!
//! The crate turns the manager's abstract instance requests into compute,
//! image and network API calls. Every server it creates carries
//! `garm-controller-id` and `garm-pool-id` tags; lookups never see servers
//! owned by another controller. A create is driven to `ACTIVE` or rolled
//! back, and per-request `extra_specs` documents are schema-validated and
//! merged over the static configuration before anything reaches the cloud.

pub mod config;
pub mod credentials;
pub mod execution;
pub mod lifecycle;
pub mod mapper;
pub mod openstack;
pub mod overlay;
pub mod params;
pub mod provider;
pub mod resolver;
pub mod scope;
pub mod test_support;
pub mod userdata;

pub use config::{ConfigError, ProviderConfig};
pub use credentials::{CloudEntry, CredentialFiles, CredentialsError, load_cloud};
pub use execution::{Command, Environment, ExternalProvider, ProviderFuture, parse_bootstrap, run};
pub use lifecycle::{LifecycleError, Orchestrator};
pub use mapper::to_instance;
pub use openstack::{ApiError, ApiFuture, ComputeApi, ManagedServer, OpenStackClient, ServerStatus};
pub use overlay::{BuildDefaults, BuildSpecification, ExtraSpecs, OverlayError, compose};
pub use params::{BootstrapInstance, InstanceStatus, ProviderInstance};
pub use provider::{EXIT_CODE_DUPLICATE, EXIT_CODE_NOT_FOUND, OpenStackProvider, ProviderError};
pub use resolver::{ResolveError, is_canonical_id};
pub use scope::OwnershipScope;
pub use userdata::{CloudConfigRenderer, DefaultCloudConfigRenderer, ForgeToolFetcher, ToolFetcher};
