//! BDD step definitions for provider behaviour.

use garm_provider_openstack::InstanceStatus;
use garm_provider_openstack::openstack::ServerStatus;
use garm_provider_openstack::scope::{controller_tag, pool_tag};
use garm_provider_openstack::test_support::{Call, owned_server};
use rstest_bdd_macros::{given, then, when};
use serde_json::json;

use super::test_helpers::{Outcome, ProviderContext};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn server_id(index: usize) -> String {
    format!("aaaaaaaa-0000-4000-8000-{index:012}")
}

#[given("a cloud offering flavor \"{flavor}\", image \"{image}\" and network \"{network}\"")]
fn cloud_offering(
    mut provider_context: ProviderContext,
    flavor: String,
    image: String,
    network: String,
) -> ProviderContext {
    provider_context.stock(&flavor, &image, &network);
    provider_context.network = network;
    provider_context
}

#[given("an empty cloud")]
fn empty_cloud(provider_context: ProviderContext) -> ProviderContext {
    provider_context
}

#[given("new servers stay in build")]
fn servers_stay_in_build(provider_context: ProviderContext) -> ProviderContext {
    provider_context
        .cloud
        .script_created([Some(ServerStatus::Build)]);
    provider_context
}

#[given("the request asks for a boot disk size of \"{size}\"")]
fn boot_disk_size(mut provider_context: ProviderContext, size: String) -> ProviderContext {
    provider_context.extra_specs = Some(json!({ "boot_disk_size": size }));
    provider_context
}

#[given("server \"{name}\" owned by controller \"{controller}\" in pool \"{pool}\"")]
fn existing_server(
    provider_context: ProviderContext,
    name: String,
    controller: String,
    pool: String,
) -> ProviderContext {
    let id = server_id(provider_context.cloud.servers().len() + 1);
    provider_context.cloud.insert(owned_server(
        &id,
        &name,
        &controller,
        &pool,
        ServerStatus::Active,
    ));
    provider_context
}

#[when("the manager creates runner \"{name}\" in pool \"{pool}\"")]
fn create_runner(mut provider_context: ProviderContext, name: String, pool: String) -> ProviderContext {
    provider_context.create(&name, &pool);
    provider_context
}

#[when("the manager deletes runner \"{name}\"")]
fn delete_runner(mut provider_context: ProviderContext, name: String) -> ProviderContext {
    provider_context.delete(&name);
    provider_context
}

#[when("the manager looks up runner \"{name}\"")]
fn get_runner(mut provider_context: ProviderContext, name: String) -> ProviderContext {
    provider_context.get(&name);
    provider_context
}

#[when("the manager lists pool \"{pool}\"")]
fn list_pool(mut provider_context: ProviderContext, pool: String) -> ProviderContext {
    provider_context.list(&pool);
    provider_context
}

fn outcome(provider_context: &ProviderContext) -> Result<&Outcome, StepError> {
    provider_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("the runner is reported as \"{status}\"")]
fn runner_reported_as(provider_context: &ProviderContext, status: String) -> Result<(), StepError> {
    let expected: InstanceStatus = serde_json::from_value(json!(status))
        .map_err(|err| StepError::Assertion(format!("unknown status {status}: {err}")))?;
    match outcome(provider_context)? {
        Outcome::Created(instance) if instance.status == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a {status} runner, got {other:?}"
        ))),
    }
}

#[then("the submitted server is tagged for controller \"{controller}\" and pool \"{pool}\"")]
fn submitted_server_tags(
    provider_context: &ProviderContext,
    controller: String,
    pool: String,
) -> Result<(), StepError> {
    let created = provider_context.cloud.created();
    let Some(request) = created.first() else {
        return Err(StepError::Assertion(String::from("no server was submitted")));
    };
    for tag in [controller_tag(&controller), pool_tag(&pool)] {
        if !request.tags.contains(&tag) {
            return Err(StepError::Assertion(format!(
                "tag {tag} missing from {:?}",
                request.tags
            )));
        }
    }
    Ok(())
}

#[then("the operation fails with exit code {code:i32}")]
fn fails_with_exit_code(provider_context: &ProviderContext, code: i32) -> Result<(), StepError> {
    match outcome(provider_context)? {
        Outcome::Failed { code: actual, .. } if *actual == code => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure with exit code {code}, got {other:?}"
        ))),
    }
}

#[then("the operation succeeds")]
fn operation_succeeds(provider_context: &ProviderContext) -> Result<(), StepError> {
    match outcome(provider_context)? {
        Outcome::Failed { message, .. } => Err(StepError::Assertion(format!(
            "expected success, got: {message}"
        ))),
        _ => Ok(()),
    }
}

#[then("no servers remain in the cloud")]
fn no_servers_remain(provider_context: &ProviderContext) -> Result<(), StepError> {
    let servers = provider_context.cloud.servers();
    if servers.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("servers left behind: {servers:?}")))
    }
}

#[then("no server was submitted")]
fn no_server_submitted(provider_context: &ProviderContext) -> Result<(), StepError> {
    let calls = provider_context.cloud.calls();
    if calls.iter().any(|call| matches!(call, Call::CreateServer(_))) {
        Err(StepError::Assertion(format!("unexpected create in {calls:?}")))
    } else {
        Ok(())
    }
}

#[then("no server was deleted")]
fn no_server_deleted(provider_context: &ProviderContext) -> Result<(), StepError> {
    let calls = provider_context.cloud.calls();
    if calls.iter().any(|call| matches!(call, Call::ForceDelete(_))) {
        Err(StepError::Assertion(format!("unexpected delete in {calls:?}")))
    } else {
        Ok(())
    }
}

#[then("the listing contains only \"{name}\"")]
fn listing_contains_only(provider_context: &ProviderContext, name: String) -> Result<(), StepError> {
    match outcome(provider_context)? {
        Outcome::Listed(instances)
            if instances.len() == 1 && instances.iter().all(|instance| instance.name == name) =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected only {name} in the listing, got {other:?}"
        ))),
    }
}
