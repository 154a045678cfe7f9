//! Provider configuration loading via `ortho-config`.
//!
//! Values merge defaults, the TOML file named by `GARM_PROVIDER_CONFIG_FILE`
//! (or a discovered `garm-provider-openstack.toml`) and `GARM_OPENSTACK_*`
//! environment variables, in that order of precedence.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::CredentialFiles;

/// Upper bound, in seconds, on the status wait and the poll interval.
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// Glance visibilities accepted as an image filter.
pub const IMAGE_VISIBILITIES: [&str; 5] = ["public", "private", "shared", "community", "all"];

/// Returns true when `value` is a recognised image visibility.
#[must_use]
pub fn is_valid_visibility(value: &str) -> bool {
    IMAGE_VISIBILITIES.contains(&value)
}

/// `[credentials]` table naming the `clouds.yaml` family of files.
///
/// Paths set here take precedence over the flat `*_clouds_file` keys.
#[derive(Clone, Debug, Default, Deserialize, serde::Serialize, PartialEq, Eq)]
pub struct CredentialPaths {
    /// Path to `clouds.yaml`.
    pub clouds: Option<String>,
    /// Path to `clouds-public.yaml`.
    pub public_clouds: Option<String>,
    /// Path to `secure.yaml`.
    pub secure_clouds: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|path| !path.trim().is_empty())
}

/// Static provider defaults, read once at start-up.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "GARM_OPENSTACK",
    discovery(
        app_name = "garm-provider-openstack",
        env_var = "GARM_PROVIDER_CONFIG_FILE",
        config_file_name = "garm-provider-openstack.toml",
        dotfile_name = ".garm-provider-openstack.toml",
        project_file_name = "garm-provider-openstack.toml"
    )
)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "configuration struct with user-facing toggles that are naturally booleans"
)]
pub struct ProviderConfig {
    /// Name of the cloud entry in `clouds.yaml`.
    #[ortho_config(default = String::new())]
    pub cloud: String,
    /// Path to `clouds.yaml`.
    #[ortho_config(default = String::new())]
    pub clouds_file: String,
    /// Path to `clouds-public.yaml`.
    pub public_clouds_file: Option<String>,
    /// Path to `secure.yaml`.
    pub secure_clouds_file: Option<String>,
    /// Nested credential paths.
    #[ortho_config(skip_cli)]
    pub credentials: Option<CredentialPaths>,
    /// Tenant network runners are attached to.
    #[ortho_config(default = String::new())]
    pub network_id: String,
    /// Cinder volume type used for boot volumes.
    pub default_storage_backend: Option<String>,
    /// Security groups attached to every runner.
    #[ortho_config(default = Vec::new())]
    pub default_security_groups: Vec<String>,
    /// Boot runners from a volume created from the image.
    #[ortho_config(default = false)]
    pub boot_from_volume: bool,
    /// Boot volume size in GB. Defaults to 50 when unset.
    pub root_disk_size: Option<u64>,
    /// Attach a config drive.
    #[ortho_config(default = false)]
    pub use_config_drive: bool,
    /// Image owners allowed to provide runner images; empty allows all.
    #[ortho_config(default = Vec::new())]
    pub allowed_image_owners: Vec<String>,
    /// Visibility used when looking up images by name.
    pub image_visibility: Option<String>,
    /// Skip package updates on first boot.
    #[ortho_config(default = false)]
    pub disable_updates_on_boot: bool,
    /// Trace the bootstrap script.
    #[ortho_config(default = false)]
    pub enable_boot_debug: bool,
    /// Seconds to wait for a server to reach its target state.
    #[ortho_config(default = 120)]
    pub wait_timeout_secs: u64,
    /// Seconds between status polls.
    #[ortho_config(default = 2)]
    pub poll_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ProviderConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to the provider config file",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    fn require_bounded(key: &str, value: u64) -> Result<(), ConfigError> {
        if value == 0 || value > MAX_WAIT_SECS {
            return Err(ConfigError::Invalid(format!(
                "{key} must be between 1 and {MAX_WAIT_SECS} seconds, got {value}"
            )));
        }
        Ok(())
    }

    const fn nested(&self) -> Option<&CredentialPaths> {
        self.credentials.as_ref()
    }

    fn clouds_path(&self) -> &str {
        non_empty(self.nested().and_then(|paths| paths.clouds.as_ref()))
            .unwrap_or(&self.clouds_file)
    }

    /// Loads configuration from files and the environment without parsing
    /// command-line arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the sources cannot be merged.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("garm-provider-openstack")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.cloud,
            &FieldMetadata::new("cloud name", "GARM_OPENSTACK_CLOUD", "cloud"),
        )?;
        Self::require_field(
            self.clouds_path(),
            &FieldMetadata::new(
                "clouds.yaml path",
                "GARM_OPENSTACK_CLOUDS_FILE",
                "clouds_file (or credentials.clouds)",
            ),
        )?;
        Self::require_field(
            &self.network_id,
            &FieldMetadata::new("network ID", "GARM_OPENSTACK_NETWORK_ID", "network_id"),
        )?;
        if let Some(visibility) = &self.image_visibility
            && !is_valid_visibility(visibility)
        {
            return Err(ConfigError::Invalid(format!(
                "image_visibility {visibility} is not one of {}",
                IMAGE_VISIBILITIES.join(", ")
            )));
        }
        Self::require_bounded("wait_timeout_secs", self.wait_timeout_secs)?;
        Self::require_bounded("poll_interval_secs", self.poll_interval_secs)?;
        Ok(())
    }

    /// Credential file locations.
    #[must_use]
    pub fn credential_files(&self) -> CredentialFiles {
        let secure = non_empty(self.nested().and_then(|paths| paths.secure_clouds.as_ref()))
            .or(self.secure_clouds_file.as_deref());
        let public = non_empty(self.nested().and_then(|paths| paths.public_clouds.as_ref()))
            .or(self.public_clouds_file.as_deref());
        CredentialFiles {
            clouds: Utf8PathBuf::from(self.clouds_path()),
            secure: secure.map(Utf8PathBuf::from),
            public: public.map(Utf8PathBuf::from),
        }
    }

    /// Upper bound on every status wait.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Delay between status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A field holds an unacceptable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The `ortho-config` loader failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Credentials for the configured cloud could not be loaded.
    #[error("failed to load credentials: {0}")]
    Credentials(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<crate::credentials::CredentialsError> for ConfigError {
    fn from(value: crate::credentials::CredentialsError) -> Self {
        Self::Credentials(value.to_string())
    }
}
