//! Wire types exchanged with the runner-pool manager.
//!
//! The manager hands the provider a [`BootstrapInstance`] describing the
//! runner it wants and expects a [`ProviderInstance`] back. Both travel as
//! JSON, so the serde names below are part of the external contract.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating system family requested for a runner.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    /// Linux guests, bootstrapped through `#cloud-config`.
    Linux,
    /// Windows guests, bootstrapped through a PowerShell user-data script.
    Windows,
    /// Any family the provider does not know how to bootstrap.
    #[default]
    #[serde(other)]
    Unknown,
}

impl OsType {
    /// Returns the lowercase label used in metadata and tool matching.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture requested for a runner.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsArch {
    /// 64-bit x86.
    Amd64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit ARM.
    Arm,
    /// 32-bit x86.
    I386,
    /// Anything else.
    #[default]
    #[serde(other)]
    Unknown,
}

impl OsArch {
    /// Returns the lowercase label used in metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
            Self::I386 => "i386",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OsArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloadable runner archive advertised by the forge.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunnerApplicationDownload {
    /// Target OS as reported by the forge (`linux`, `win`, `osx`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Target architecture as reported by the forge (`x64`, `arm64`, `arm`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Archive download location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Archive file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Expected SHA-256 digest of the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_checksum: Option<String>,
    /// Short-lived token required by some download endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_download_token: Option<String>,
}

/// Toggles that shape the rendered user-data.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UserDataOptions {
    /// Skip package upgrades and package installation on first boot.
    #[serde(default)]
    pub disable_updates_on_boot: bool,
    /// Additional distribution packages to install.
    #[serde(default)]
    pub extra_packages: Vec<String>,
    /// Trace the bootstrap script (`set -x`).
    #[serde(default)]
    pub enable_boot_debug: bool,
}

/// Request to bootstrap a single runner instance.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BootstrapInstance {
    /// Name the server must be created with.
    #[serde(default)]
    pub name: String,
    /// Runner archives the instance may download.
    #[serde(default)]
    pub tools: Vec<RunnerApplicationDownload>,
    /// Repository, organisation or enterprise URL the runner registers with.
    #[serde(default)]
    pub repo_url: String,
    /// Endpoint the runner reports bootstrap progress to.
    #[serde(default, rename = "callback-url")]
    pub callback_url: String,
    /// Endpoint serving runner registration metadata.
    #[serde(default, rename = "metadata-url")]
    pub metadata_url: String,
    /// Token authenticating the instance against the callback endpoints.
    #[serde(default, rename = "instance-token")]
    pub instance_token: String,
    /// Public keys authorised on the instance.
    #[serde(default, rename = "ssh-keys")]
    pub ssh_keys: Vec<String>,
    /// Per-request override document, validated by the overlay engine.
    #[serde(default)]
    pub extra_specs: Option<serde_json::Value>,
    /// Runner group to join, if any.
    #[serde(default)]
    pub github_runner_group: String,
    /// Operating system family.
    #[serde(default)]
    pub os_type: OsType,
    /// CPU architecture.
    #[serde(default)]
    pub arch: OsArch,
    /// Flavor name or identifier.
    #[serde(default)]
    pub flavor: String,
    /// Image name or identifier.
    #[serde(default)]
    pub image: String,
    /// Runner labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Pool the instance belongs to.
    #[serde(default, rename = "pool_id")]
    pub pool_id: String,
    /// User-data toggles.
    #[serde(default)]
    pub user_data_options: UserDataOptions,
}

/// Abstract lifecycle state reported back to the manager.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum InstanceStatus {
    /// The server is up.
    #[serde(rename = "running")]
    Running,
    /// The server is powered off.
    #[serde(rename = "stopped")]
    Stopped,
    /// The server is still being built.
    #[serde(rename = "pending_create")]
    PendingCreate,
    /// The server is being removed.
    #[serde(rename = "pending_delete")]
    PendingDelete,
    /// The cloud reports a fault.
    #[serde(rename = "error")]
    Error,
    /// The remote status has no abstract counterpart.
    #[default]
    #[serde(rename = "")]
    Unknown,
}

/// Reachability class of an address.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// Tenant-network (`fixed`) address.
    Private,
    /// Floating address.
    Public,
}

/// Single address attached to an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Address {
    /// Textual IP address.
    pub address: String,
    /// Reachability class.
    #[serde(rename = "type")]
    pub kind: AddressType,
}

/// Abstract instance record returned to the manager.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProviderInstance {
    /// Cloud-assigned identifier.
    pub provider_id: String,
    /// Display name.
    pub name: String,
    /// OS family recorded in server metadata.
    #[serde(default)]
    pub os_type: String,
    /// OS distribution name recorded in server metadata.
    #[serde(default)]
    pub os_name: String,
    /// OS version recorded in server metadata.
    #[serde(default)]
    pub os_version: String,
    /// CPU architecture recorded in server metadata.
    #[serde(default)]
    pub os_arch: String,
    /// Fixed and floating addresses.
    #[serde(default)]
    pub addresses: Vec<Address>,
    /// Abstract lifecycle state.
    #[serde(default)]
    pub status: InstanceStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn bootstrap_request_parses_manager_payload() {
        let payload = r#"{
            "name": "runner-1",
            "tools": [{"os": "linux", "architecture": "x64", "download_url": "https://example.com/r.tgz"}],
            "callback-url": "https://garm/callbacks",
            "metadata-url": "https://garm/metadata",
            "instance-token": "secret",
            "os_type": "linux",
            "arch": "amd64",
            "flavor": "m1.small",
            "image": "ubuntu-22.04",
            "pool_id": "pool-1",
            "extra_specs": {"boot_from_volume": true}
        }"#;
        let parsed: BootstrapInstance =
            serde_json::from_str(payload).unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(parsed.name, "runner-1");
        assert_eq!(parsed.os_type, OsType::Linux);
        assert_eq!(parsed.arch, OsArch::Amd64);
        assert_eq!(parsed.pool_id, "pool-1");
        assert_eq!(parsed.callback_url, "https://garm/callbacks");
        assert!(parsed.extra_specs.is_some());
    }

    #[rstest]
    fn unknown_os_family_is_tolerated() {
        let parsed: BootstrapInstance = serde_json::from_str(r#"{"os_type": "plan9"}"#)
            .unwrap_or_else(|err| panic!("parse: {err}"));
        assert_eq!(parsed.os_type, OsType::Unknown);
    }

    #[rstest]
    #[case(InstanceStatus::Running, "\"running\"")]
    #[case(InstanceStatus::PendingCreate, "\"pending_create\"")]
    #[case(InstanceStatus::Unknown, "\"\"")]
    fn status_serialises_to_manager_vocabulary(
        #[case] status: InstanceStatus,
        #[case] expected: &str,
    ) {
        let rendered = serde_json::to_string(&status).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(rendered, expected);
    }
}
