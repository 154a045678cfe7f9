//! Records exchanged with the remote API.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Lifecycle status reported by the compute service.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(from = "String")]
pub enum ServerStatus {
    /// `BUILD`
    Build,
    /// `ACTIVE`
    Active,
    /// `SHUTOFF`
    Shutoff,
    /// `DELETING`
    Deleting,
    /// `ERROR`
    Error,
    /// `DELETED`
    Deleted,
    /// Any other status string.
    #[default]
    Unknown,
}

impl ServerStatus {
    /// Parses the compute service's uppercase status vocabulary. Unlisted
    /// values collapse to [`ServerStatus::Unknown`].
    #[must_use]
    pub fn from_remote(value: &str) -> Self {
        match value {
            "BUILD" => Self::Build,
            "ACTIVE" => Self::Active,
            "SHUTOFF" => Self::Shutoff,
            "DELETING" => Self::Deleting,
            "ERROR" => Self::Error,
            "DELETED" => Self::Deleted,
            _ => Self::Unknown,
        }
    }

    /// Returns the compute service's spelling of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "BUILD",
            Self::Active => "ACTIVE",
            Self::Shutoff => "SHUTOFF",
            Self::Deleting => "DELETING",
            Self::Error => "ERROR",
            Self::Deleted => "DELETED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<String> for ServerStatus {
    fn from(value: String) -> Self {
        Self::from_remote(&value)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat view of a compute server including the extension attributes the
/// provider reads.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ManagedServer {
    /// Cloud-assigned identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: ServerStatus,
    /// Free-form `key=value` tags.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    /// Network name to interface descriptors. Kept untyped so malformed
    /// entries can be skipped instead of failing the whole record.
    #[serde(default, deserialize_with = "null_as_default")]
    pub addresses: BTreeMap<String, serde_json::Value>,
    /// Free-form server metadata.
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: BTreeMap<String, String>,
    /// `OS-EXT-STS:task_state`, reported while a status wait is in progress.
    #[serde(default, rename = "OS-EXT-STS:task_state")]
    pub task_state: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Compute flavor.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Flavor {
    /// Flavor identifier.
    pub id: String,
    /// Flavor name.
    #[serde(default)]
    pub name: String,
}

/// Glance image with the properties the provider consumes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Image {
    /// Image identifier.
    pub id: String,
    /// Image name.
    #[serde(default)]
    pub name: String,
    /// Project owning the image.
    #[serde(default)]
    pub owner: Option<String>,
    /// `os_distro` property.
    #[serde(default)]
    pub os_distro: Option<String>,
    /// `os_version` property.
    #[serde(default)]
    pub os_version: Option<String>,
}

/// Filters applied when listing images.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageFilter {
    /// Exact image name.
    pub name: Option<String>,
    /// Glance visibility (`public`, `private`, `shared`, `community`, `all`).
    pub visibility: Option<String>,
}

/// Neutron network.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Network {
    /// Network identifier.
    pub id: String,
    /// Network name.
    #[serde(default)]
    pub name: String,
}

/// Boot volume created from an image when booting from volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockDevice {
    /// Source image.
    pub image_id: String,
    /// Volume size in GB.
    pub volume_size: u64,
    /// Cinder volume type, when a storage backend is configured.
    pub volume_type: Option<String>,
}

/// Fully resolved server build request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerCreateRequest {
    /// Server name.
    pub name: String,
    /// Flavor identifier.
    pub flavor_id: String,
    /// Image identifier. Omitted on the wire when booting from volume.
    pub image_id: String,
    /// Network the server is attached to.
    pub network_id: String,
    /// Security group names.
    pub security_groups: Vec<String>,
    /// Base64-encoded user data.
    pub user_data: String,
    /// Attach a config drive.
    pub config_drive: bool,
    /// Ownership tags.
    pub tags: Vec<String>,
    /// Server metadata.
    pub metadata: BTreeMap<String, String>,
    /// Boot volume, when booting from volume.
    pub block_device: Option<BlockDevice>,
}
