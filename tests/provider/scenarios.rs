//! BDD scenarios for the provider commands.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProviderContext, provider_context};

#[scenario(
    path = "tests/features/provider.feature",
    name = "Create a runner that becomes active"
)]
fn scenario_create_active(provider_context: ProviderContext) {
    let _ = provider_context;
}

#[scenario(
    path = "tests/features/provider.feature",
    name = "Roll back a runner that never becomes active"
)]
fn scenario_rollback_on_timeout(provider_context: ProviderContext) {
    let _ = provider_context;
}

#[scenario(
    path = "tests/features/provider.feature",
    name = "Reject malformed extra specs before calling the cloud"
)]
fn scenario_reject_extra_specs(provider_context: ProviderContext) {
    let _ = provider_context;
}

#[scenario(
    path = "tests/features/provider.feature",
    name = "Deleting a missing runner succeeds"
)]
fn scenario_delete_missing(provider_context: ProviderContext) {
    let _ = provider_context;
}

#[scenario(
    path = "tests/features/provider.feature",
    name = "Servers of another controller are invisible"
)]
fn scenario_foreign_servers_invisible(provider_context: ProviderContext) {
    let _ = provider_context;
}

#[scenario(
    path = "tests/features/provider.feature",
    name = "A name shared across pools is ambiguous"
)]
fn scenario_pool_ambiguity(provider_context: ProviderContext) {
    let _ = provider_context;
}

#[scenario(
    path = "tests/features/provider.feature",
    name = "Listing stays inside the pool"
)]
fn scenario_list_scoped_to_pool(provider_context: ProviderContext) {
    let _ = provider_context;
}
