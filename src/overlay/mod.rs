//! Configuration overlay: merges provider defaults with per-request
//! overrides into a validated [`BuildSpecification`].

mod extra_specs;

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

pub use extra_specs::ExtraSpecs;

use crate::config::{ProviderConfig, is_valid_visibility};
use crate::openstack::{BlockDevice, Flavor, Image, Network, ServerCreateRequest};
use crate::params::{BootstrapInstance, RunnerApplicationDownload};
use crate::scope::{CONTROLLER_TAG_KEY, POOL_TAG_KEY, controller_tag, pool_tag};
use crate::userdata::{
    CloudConfigRenderer, CloudInitOverrides, ToolFetcher, UserDataError, UserDataRequest,
};

/// Boot volume size used when neither configuration nor overrides set one.
pub const DEFAULT_BOOT_DISK_SIZE: u64 = 50;

/// Errors raised while building a [`BuildSpecification`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OverlayError {
    /// The override document violates the schema.
    #[error("extra specs failed schema validation: {}", .violations.join("; "))]
    Schema {
        /// One entry per violation, prefixed with the offending field.
        violations: Vec<String>,
    },
    /// The override document passed the schema but could not be decoded.
    #[error("failed to decode extra specs: {0}")]
    Decode(String),
    /// A base64 field in the override document is malformed.
    #[error("invalid base64 in {field}: {message}")]
    Encoding {
        /// Offending field.
        field: String,
        /// Decoder error.
        message: String,
    },
    /// The merged specification lacks a required value.
    #[error("invalid build specification: {0}")]
    Incomplete(String),
    /// Tool selection or user-data rendering failed.
    #[error(transparent)]
    UserData(#[from] UserDataError),
}

/// Provider-wide defaults the overlay starts from.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "mirrors the boolean toggles of the provider configuration"
)]
pub struct BuildDefaults {
    /// Tenant network.
    pub network_id: String,
    /// Cinder volume type for boot volumes.
    pub storage_backend: Option<String>,
    /// Security groups.
    pub security_groups: Vec<String>,
    /// Boot from volume.
    pub boot_from_volume: bool,
    /// Boot volume size in GB.
    pub boot_disk_size: Option<u64>,
    /// Attach a config drive.
    pub use_config_drive: bool,
    /// Allowed image owners; empty allows every owner.
    pub allowed_image_owners: Vec<String>,
    /// Image visibility filter.
    pub image_visibility: Option<String>,
    /// Skip package updates on first boot.
    pub disable_updates: bool,
    /// Trace the bootstrap script.
    pub enable_boot_debug: bool,
}

impl From<&ProviderConfig> for BuildDefaults {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            network_id: config.network_id.clone(),
            storage_backend: config.default_storage_backend.clone(),
            security_groups: config.default_security_groups.clone(),
            boot_from_volume: config.boot_from_volume,
            boot_disk_size: config.root_disk_size,
            use_config_drive: config.use_config_drive,
            allowed_image_owners: config.allowed_image_owners.clone(),
            image_visibility: config.image_visibility.clone(),
            disable_updates: config.disable_updates_on_boot,
            enable_boot_debug: config.enable_boot_debug,
        }
    }
}

/// Fully resolved parameters for one server build.
#[derive(Clone, Debug, Default, PartialEq)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "mirrors the boolean toggles of the provider configuration"
)]
pub struct BuildSpecification {
    /// Cinder volume type for the boot volume.
    pub storage_backend: Option<String>,
    /// Security groups.
    pub security_groups: Vec<String>,
    /// Allowed image owners; empty allows every owner.
    pub allowed_image_owners: Vec<String>,
    /// Image visibility filter.
    pub image_visibility: Option<String>,
    /// Tenant network name or identifier.
    pub network_id: String,
    /// Boot from volume.
    pub boot_from_volume: bool,
    /// Boot volume size in GB.
    pub boot_disk_size: u64,
    /// Attach a config drive.
    pub use_config_drive: bool,
    /// Flavor name or identifier.
    pub flavor: String,
    /// Image name or identifier.
    pub image: String,
    /// Skip package updates on first boot.
    pub disable_updates: bool,
    /// Trace the bootstrap script.
    pub enable_boot_debug: bool,
    /// Extra packages to install.
    pub extra_packages: Vec<String>,
    /// Runner archive selected for the request.
    pub tools: RunnerApplicationDownload,
    /// Ownership tags, pool tag first.
    pub tags: Vec<String>,
    /// Server metadata.
    pub metadata: BTreeMap<String, String>,
    /// Decoded cloud-init augmentation block.
    pub cloud_init: CloudInitOverrides,
    /// Rendered user data (plain text).
    pub user_data: String,
    /// Request the specification was derived from.
    pub bootstrap: BootstrapInstance,
}

impl BuildSpecification {
    /// Seeds a specification from provider defaults and the bootstrap request.
    #[must_use]
    pub fn from_defaults(
        defaults: &BuildDefaults,
        bootstrap: BootstrapInstance,
        controller_id: &str,
        tools: RunnerApplicationDownload,
    ) -> Self {
        let tags = vec![pool_tag(&bootstrap.pool_id), controller_tag(controller_id)];
        let metadata = BTreeMap::from([
            ("os_arch".to_owned(), bootstrap.arch.as_str().to_owned()),
            ("os_type".to_owned(), bootstrap.os_type.as_str().to_owned()),
            (POOL_TAG_KEY.to_owned(), bootstrap.pool_id.clone()),
            (CONTROLLER_TAG_KEY.to_owned(), controller_id.to_owned()),
        ]);
        let options = &bootstrap.user_data_options;
        Self {
            storage_backend: defaults.storage_backend.clone(),
            security_groups: defaults.security_groups.clone(),
            allowed_image_owners: defaults.allowed_image_owners.clone(),
            image_visibility: defaults.image_visibility.clone(),
            network_id: defaults.network_id.clone(),
            boot_from_volume: defaults.boot_from_volume,
            boot_disk_size: defaults.boot_disk_size.unwrap_or(DEFAULT_BOOT_DISK_SIZE),
            use_config_drive: defaults.use_config_drive,
            flavor: bootstrap.flavor.clone(),
            image: bootstrap.image.clone(),
            disable_updates: defaults.disable_updates || options.disable_updates_on_boot,
            enable_boot_debug: defaults.enable_boot_debug || options.enable_boot_debug,
            extra_packages: options.extra_packages.clone(),
            tools,
            tags,
            metadata,
            cloud_init: CloudInitOverrides::default(),
            user_data: String::new(),
            bootstrap,
        }
    }

    /// Applies per-request overrides.
    ///
    /// Scalars override when present, strings when non-empty, security
    /// groups when non-empty and the owner allowlist whenever present. An
    /// unrecognised image visibility leaves the default untouched.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Encoding`] when the cloud-init block carries
    /// malformed base64.
    pub fn apply(&mut self, overrides: &ExtraSpecs) -> Result<(), OverlayError> {
        if let Some(backend) = overrides.storage_backend.as_ref().filter(|v| !v.is_empty()) {
            self.storage_backend = Some(backend.clone());
        }
        if let Some(size) = overrides.boot_disk_size {
            self.boot_disk_size = size;
        }
        if let Some(enabled) = overrides.boot_from_volume {
            self.boot_from_volume = enabled;
        }
        if let Some(network) = overrides.network_id.as_ref().filter(|v| !v.is_empty()) {
            self.network_id.clone_from(network);
        }
        if let Some(groups) = overrides.security_groups.as_ref().filter(|v| !v.is_empty()) {
            self.security_groups.clone_from(groups);
        }
        if let Some(enabled) = overrides.use_config_drive {
            self.use_config_drive = enabled;
        }
        if let Some(owners) = &overrides.allowed_image_owners {
            self.allowed_image_owners.clone_from(owners);
        }
        if let Some(enabled) = overrides.enable_boot_debug {
            self.enable_boot_debug = enabled;
        }
        if let Some(disabled) = overrides.disable_updates {
            self.disable_updates = disabled;
        }
        if let Some(packages) = &overrides.extra_packages {
            self.extra_packages.clone_from(packages);
        }
        if let Some(visibility) = overrides
            .image_visibility
            .as_deref()
            .filter(|value| is_valid_visibility(value))
        {
            self.image_visibility = Some(visibility.to_owned());
        }
        self.cloud_init = overrides.cloud_init()?;
        Ok(())
    }

    /// Checks that every value required to request a server is present.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Incomplete`] naming the first missing value.
    pub fn validate(&self) -> Result<(), OverlayError> {
        let missing = |message: &str| -> Result<(), OverlayError> {
            Err(OverlayError::Incomplete(message.to_owned()))
        };
        if self.network_id.is_empty() {
            return missing("missing network ID");
        }
        if self.boot_from_volume && self.boot_disk_size == 0 {
            return missing("boot from volume is enabled, and boot disk size is 0");
        }
        if self.flavor.is_empty() {
            return missing("missing flavor");
        }
        if self.image.is_empty() {
            return missing("missing image");
        }
        if self.tags.is_empty() {
            return missing("missing tags; at least the controller ID and pool ID must be set");
        }
        if self.tools.download_url.is_none() {
            return missing("missing tools");
        }
        if self.bootstrap.name.is_empty() {
            return missing("missing bootstrap params");
        }
        Ok(())
    }

    /// Bootstrap request with the merged user-data toggles applied.
    #[must_use]
    pub fn effective_bootstrap(&self) -> BootstrapInstance {
        let mut bootstrap = self.bootstrap.clone();
        bootstrap.user_data_options.disable_updates_on_boot = self.disable_updates;
        bootstrap.user_data_options.enable_boot_debug = self.enable_boot_debug;
        bootstrap
            .user_data_options
            .extra_packages
            .clone_from(&self.extra_packages);
        bootstrap
    }

    /// Returns true when `image` may be used under the owner allowlist.
    #[must_use]
    pub fn allows_image_owner(&self, image: &Image) -> bool {
        self.allowed_image_owners.is_empty()
            || image
                .owner
                .as_ref()
                .is_some_and(|owner| self.allowed_image_owners.contains(owner))
    }

    /// Builds the compute request once flavor, image and network are known.
    /// Image properties `os_distro` and `os_version` are recorded as
    /// `os_name` and `os_version` metadata.
    #[must_use]
    pub fn server_request(
        &self,
        flavor: &Flavor,
        image: &Image,
        network: &Network,
    ) -> ServerCreateRequest {
        let mut metadata = self.metadata.clone();
        if let Some(name) = &image.os_distro {
            metadata.insert("os_name".to_owned(), name.clone());
        }
        if let Some(version) = &image.os_version {
            metadata.insert("os_version".to_owned(), version.clone());
        }
        let block_device = self.boot_from_volume.then(|| BlockDevice {
            image_id: image.id.clone(),
            volume_size: self.boot_disk_size,
            volume_type: self.storage_backend.clone(),
        });
        ServerCreateRequest {
            name: self.bootstrap.name.clone(),
            flavor_id: flavor.id.clone(),
            image_id: image.id.clone(),
            network_id: network.id.clone(),
            security_groups: self.security_groups.clone(),
            user_data: STANDARD.encode(self.user_data.as_bytes()),
            config_drive: self.use_config_drive,
            tags: self.tags.clone(),
            metadata,
            block_device,
        }
    }
}

/// Strategies used while composing a specification.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Picks the runner archive for the request.
    pub tools: &'a dyn ToolFetcher,
    /// Renders user data.
    pub renderer: &'a dyn CloudConfigRenderer,
}

/// Runs the whole overlay: tool selection, override validation, merge,
/// completeness check and user-data rendering.
///
/// # Errors
///
/// Returns [`OverlayError`] when tools cannot be selected, the override
/// document is invalid, the merged specification is incomplete or user data
/// cannot be rendered.
pub fn compose(
    defaults: &BuildDefaults,
    bootstrap: BootstrapInstance,
    controller_id: &str,
    collaborators: Collaborators<'_>,
) -> Result<BuildSpecification, OverlayError> {
    let tools = collaborators
        .tools
        .fetch(bootstrap.os_type, bootstrap.arch, &bootstrap.tools)?;
    let overrides = ExtraSpecs::from_document(bootstrap.extra_specs.as_ref())?;
    let mut spec = BuildSpecification::from_defaults(defaults, bootstrap, controller_id, tools);
    spec.apply(&overrides)?;
    spec.validate()?;

    let effective = spec.effective_bootstrap();
    spec.user_data = collaborators.renderer.render(&UserDataRequest {
        bootstrap: &effective,
        tools: &spec.tools,
        runner_name: &effective.name,
        overrides: &spec.cloud_init,
    })?;
    Ok(spec)
}
