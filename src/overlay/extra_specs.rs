//! Per-request override document and its schema.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use schemars::JsonSchema;
use serde::Deserialize;

use super::OverlayError;
use crate::userdata::CloudInitOverrides;

/// Optional overrides supplied with a bootstrap request.
///
/// Every field is optional; absent fields leave the configured default in
/// place. Unknown keys are rejected.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExtraSpecs {
    /// Security groups to attach. Replaces the default list when non-empty.
    pub security_groups: Option<Vec<String>>,
    /// Image owners to allow when creating the instance. When absent, the
    /// configured allowlist applies; an explicit empty list allows every owner.
    pub allowed_image_owners: Option<Vec<String>>,
    /// Visibility used when looking up the image by name. Unrecognised values
    /// are ignored.
    pub image_visibility: Option<String>,
    /// Tenant network the runner is attached to.
    pub network_id: Option<String>,
    /// Cinder volume type used for the boot volume.
    pub storage_backend: Option<String>,
    /// Boot from a volume created from the image.
    pub boot_from_volume: Option<bool>,
    /// Boot volume size in GB.
    pub boot_disk_size: Option<u64>,
    /// Attach a config drive.
    pub use_config_drive: Option<bool>,
    /// Trace the bootstrap script.
    pub enable_boot_debug: Option<bool>,
    /// Skip package updates on first boot.
    pub disable_updates: Option<bool>,
    /// Extra packages to install on first boot.
    pub extra_packages: Option<Vec<String>>,
    /// Base64-encoded template replacing the default runner install script.
    pub runner_install_template: Option<String>,
    /// Base64-encoded scripts run before the runner is installed, by name.
    pub pre_install_scripts: Option<BTreeMap<String, String>>,
    /// Additional values available to the install template.
    pub extra_context: Option<BTreeMap<String, String>>,
}

fn decode_base64(field: &str, value: &str) -> Result<String, OverlayError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|err| OverlayError::Encoding {
            field: field.to_owned(),
            message: err.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|err| OverlayError::Encoding {
        field: field.to_owned(),
        message: err.to_string(),
    })
}

impl ExtraSpecs {
    /// JSON schema the override document must conform to.
    #[must_use]
    pub fn schema() -> serde_json::Value {
        let schema = schemars::schema_for!(Self);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }

    /// Validates and decodes an override document. An absent or `null`
    /// document yields empty overrides.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Schema`] naming each offending field when the
    /// document does not conform to [`ExtraSpecs::schema`], and
    /// [`OverlayError::Decode`] when it cannot be decoded afterwards.
    pub fn from_document(document: Option<&serde_json::Value>) -> Result<Self, OverlayError> {
        let Some(value) = document.filter(|value| !value.is_null()) else {
            return Ok(Self::default());
        };

        let schema = Self::schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| OverlayError::Decode(format!("invalid extra specs schema: {err}")))?;
        let violations = validator
            .iter_errors(value)
            .map(|err| {
                let path = err.instance_path.to_string();
                let field = path.trim_start_matches('/');
                if field.is_empty() {
                    err.to_string()
                } else {
                    format!("{field}: {err}")
                }
            })
            .collect::<Vec<_>>();
        if !violations.is_empty() {
            return Err(OverlayError::Schema { violations });
        }

        serde_json::from_value(value.clone()).map_err(|err| OverlayError::Decode(err.to_string()))
    }

    /// Decodes the cloud-init augmentation block.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Encoding`] when the install template or a
    /// pre-install script is not valid base64-encoded UTF-8.
    pub fn cloud_init(&self) -> Result<CloudInitOverrides, OverlayError> {
        let install_template = self
            .runner_install_template
            .as_deref()
            .map(|template| decode_base64("runner_install_template", template))
            .transpose()?;
        let mut pre_install_scripts = BTreeMap::new();
        for (name, script) in self.pre_install_scripts.iter().flatten() {
            let decoded = decode_base64(&format!("pre_install_scripts.{name}"), script)?;
            pre_install_scripts.insert(name.clone(), decoded);
        }
        Ok(CloudInitOverrides {
            install_template,
            pre_install_scripts,
            extra_context: self.extra_context.clone().unwrap_or_default(),
        })
    }
}
