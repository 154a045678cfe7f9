//! External-provider protocol: the command environment the runner-pool
//! manager sets up and the dispatch of one command against a provider.
//!
//! The manager invokes the binary once per operation. The operation and its
//! arguments arrive through `GARM_*` environment variables, the bootstrap
//! request for `CreateInstance` arrives on stdin, and results are written to
//! stdout as JSON.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use tracing::info;

use crate::params::{BootstrapInstance, ProviderInstance};
use crate::provider::ProviderError;

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Operations the runner-pool manager can request.
pub trait ExternalProvider: Send + Sync {
    /// Creates a runner instance and waits until it is running.
    fn create_instance(&self, bootstrap: BootstrapInstance) -> ProviderFuture<'_, ProviderInstance>;

    /// Deletes every instance matching the name or identifier. Missing
    /// instances are not an error.
    fn delete_instance<'a>(&'a self, instance: &'a str) -> ProviderFuture<'a, ()>;

    /// Describes the single instance matching the name or identifier.
    fn get_instance<'a>(&'a self, instance: &'a str) -> ProviderFuture<'a, ProviderInstance>;

    /// Lists every instance in a pool.
    fn list_instances<'a>(&'a self, pool_id: &'a str) -> ProviderFuture<'a, Vec<ProviderInstance>>;

    /// Removes every instance this provider created. Not supported; always
    /// succeeds without touching the cloud.
    fn remove_all_instances(&self) -> ProviderFuture<'_, ()>;

    /// Powers an instance off.
    fn stop<'a>(&'a self, instance: &'a str, force: bool) -> ProviderFuture<'a, ()>;

    /// Powers an instance on.
    fn start<'a>(&'a self, instance: &'a str) -> ProviderFuture<'a, ()>;
}

/// Operation requested through `GARM_COMMAND`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// `CreateInstance`
    CreateInstance,
    /// `DeleteInstance`
    DeleteInstance,
    /// `GetInstance`
    GetInstance,
    /// `ListInstances`
    ListInstances,
    /// `RemoveAllInstances`
    RemoveAllInstances,
    /// `StartInstance`
    StartInstance,
    /// `StopInstance`
    StopInstance,
}

impl Command {
    /// Protocol spelling of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateInstance => "CreateInstance",
            Self::DeleteInstance => "DeleteInstance",
            Self::GetInstance => "GetInstance",
            Self::ListInstances => "ListInstances",
            Self::RemoveAllInstances => "RemoveAllInstances",
            Self::StartInstance => "StartInstance",
            Self::StopInstance => "StopInstance",
        }
    }

    const fn needs_instance(self) -> bool {
        matches!(
            self,
            Self::DeleteInstance | Self::GetInstance | Self::StartInstance | Self::StopInstance
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CreateInstance" => Ok(Self::CreateInstance),
            "DeleteInstance" => Ok(Self::DeleteInstance),
            "GetInstance" => Ok(Self::GetInstance),
            "ListInstances" => Ok(Self::ListInstances),
            "RemoveAllInstances" => Ok(Self::RemoveAllInstances),
            "StartInstance" => Ok(Self::StartInstance),
            "StopInstance" => Ok(Self::StopInstance),
            other => Err(ProviderError::Validation(format!("unknown command {other}"))),
        }
    }
}

/// Everything one invocation needs, gathered from the environment and stdin.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Environment {
    /// Requested operation.
    pub command: Option<Command>,
    /// Identity of the calling controller.
    pub controller_id: String,
    /// Pool the operation targets.
    pub pool_id: String,
    /// Instance name or identifier the operation targets.
    pub instance_id: String,
    /// Bootstrap request for `CreateInstance`.
    pub bootstrap: Option<BootstrapInstance>,
}

impl Environment {
    /// Checks that the arguments required by the command are present.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] naming the missing variable.
    pub fn validate(&self) -> Result<Command, ProviderError> {
        let command = self
            .command
            .ok_or_else(|| ProviderError::Validation("missing GARM_COMMAND".to_owned()))?;
        if self.controller_id.trim().is_empty() {
            return Err(ProviderError::Validation(
                "missing GARM_CONTROLLER_ID".to_owned(),
            ));
        }
        if command.needs_instance() && self.instance_id.trim().is_empty() {
            return Err(ProviderError::Validation(format!(
                "missing GARM_INSTANCE_ID for {command}"
            )));
        }
        if command == Command::ListInstances && self.pool_id.trim().is_empty() {
            return Err(ProviderError::Validation(
                "missing GARM_POOL_ID for ListInstances".to_owned(),
            ));
        }
        if command == Command::CreateInstance && self.bootstrap.is_none() {
            return Err(ProviderError::Validation(
                "missing bootstrap parameters on stdin".to_owned(),
            ));
        }
        Ok(command)
    }
}

/// Decodes the bootstrap request read from stdin.
///
/// # Errors
///
/// Returns [`ProviderError::Validation`] for empty or malformed input.
pub fn parse_bootstrap(input: &str) -> Result<BootstrapInstance, ProviderError> {
    if input.trim().is_empty() {
        return Err(ProviderError::Validation(
            "missing bootstrap parameters on stdin".to_owned(),
        ));
    }
    serde_json::from_str(input)
        .map_err(|err| ProviderError::Validation(format!("failed to decode bootstrap parameters: {err}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, ProviderError> {
    serde_json::to_string(value)
        .map_err(|err| ProviderError::Validation(format!("failed to encode response: {err}")))
}

/// Runs the command described by `env` and returns what must be written to
/// stdout, which is empty for commands without a result.
///
/// # Errors
///
/// Returns [`ProviderError`] when the environment is incomplete or the
/// operation fails.
pub async fn run(
    provider: &dyn ExternalProvider,
    env: Environment,
) -> Result<String, ProviderError> {
    let command = env.validate()?;
    info!(%command, instance = %env.instance_id, pool = %env.pool_id, "running provider command");
    match command {
        Command::CreateInstance => {
            let bootstrap = env.bootstrap.unwrap_or_default();
            let instance = provider.create_instance(bootstrap).await?;
            encode(&instance)
        }
        Command::GetInstance => encode(&provider.get_instance(&env.instance_id).await?),
        Command::ListInstances => encode(&provider.list_instances(&env.pool_id).await?),
        Command::DeleteInstance => {
            provider.delete_instance(&env.instance_id).await?;
            Ok(String::new())
        }
        Command::RemoveAllInstances => {
            provider.remove_all_instances().await?;
            Ok(String::new())
        }
        Command::StartInstance => {
            provider.start(&env.instance_id).await?;
            Ok(String::new())
        }
        Command::StopInstance => {
            provider.stop(&env.instance_id, false).await?;
            Ok(String::new())
        }
    }
}
