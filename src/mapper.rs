//! Translation of compute servers into the manager's instance record.

use serde_json::Value;

use crate::openstack::{ManagedServer, ServerStatus};
use crate::params::{Address, AddressType, InstanceStatus, ProviderInstance};

const ADDRESS_TYPE_KEY: &str = "OS-EXT-IPS:type";
const ADDRESS_KEY: &str = "addr";

/// Maps a compute status to the abstract vocabulary. Statuses without a
/// counterpart map to [`InstanceStatus::Unknown`].
#[must_use]
pub const fn instance_status(status: ServerStatus) -> InstanceStatus {
    match status {
        ServerStatus::Active => InstanceStatus::Running,
        ServerStatus::Shutoff => InstanceStatus::Stopped,
        ServerStatus::Build => InstanceStatus::PendingCreate,
        ServerStatus::Error => InstanceStatus::Error,
        ServerStatus::Deleting => InstanceStatus::PendingDelete,
        ServerStatus::Deleted | ServerStatus::Unknown => InstanceStatus::Unknown,
    }
}

fn address_type(raw: &str) -> Option<AddressType> {
    match raw {
        "fixed" => Some(AddressType::Private),
        "floating" => Some(AddressType::Public),
        _ => None,
    }
}

fn interface_address(entry: &Value) -> Option<Address> {
    let kind = entry.get(ADDRESS_TYPE_KEY)?.as_str().and_then(address_type)?;
    let address = entry.get(ADDRESS_KEY)?.as_str()?;
    Some(Address {
        address: address.to_owned(),
        kind,
    })
}

/// Collects typed addresses from every network, skipping entries that are
/// malformed or neither `fixed` nor `floating`.
#[must_use]
pub fn addresses(server: &ManagedServer) -> Vec<Address> {
    server
        .addresses
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(interface_address)
        .collect()
}

fn metadata(server: &ManagedServer, key: &str) -> String {
    server.metadata.get(key).cloned().unwrap_or_default()
}

/// Builds the abstract instance record for `server`.
#[must_use]
pub fn to_instance(server: &ManagedServer) -> ProviderInstance {
    ProviderInstance {
        provider_id: server.id.clone(),
        name: server.name.clone(),
        os_type: metadata(server, "os_type"),
        os_name: metadata(server, "os_name"),
        os_version: metadata(server, "os_version"),
        os_arch: metadata(server, "os_arch"),
        addresses: addresses(server),
        status: instance_status(server.status),
    }
}
