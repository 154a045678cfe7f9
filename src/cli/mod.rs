//! Command-line interface definitions for the `garm-provider-openstack`
//! binary.
//!
//! The runner-pool manager drives the provider through environment
//! variables; every argument therefore has an `env` fallback. The build
//! script reuses this module to render the manual page.

use clap::Parser;

/// Operations accepted in `GARM_COMMAND`.
pub(crate) const COMMAND_NAMES: [&str; 7] = [
    "CreateInstance",
    "DeleteInstance",
    "GetInstance",
    "ListInstances",
    "RemoveAllInstances",
    "StartInstance",
    "StopInstance",
];

/// Top-level CLI for the `garm-provider-openstack` binary.
#[derive(Debug, Parser)]
#[command(
    name = "garm-provider-openstack",
    version,
    about = "OpenStack external provider for the GARM runner-pool manager",
    after_help = "Configuration is read from the file named by GARM_PROVIDER_CONFIG_FILE \
                  and from GARM_OPENSTACK_* environment variables."
)]
pub(crate) struct Cli {
    /// Operation to perform.
    #[arg(
        long,
        env = "GARM_COMMAND",
        value_name = "COMMAND",
        value_parser = clap::builder::PossibleValuesParser::new(COMMAND_NAMES)
    )]
    pub(crate) command: String,
    /// Identity of the calling controller; scopes every lookup.
    #[arg(long, env = "GARM_CONTROLLER_ID", value_name = "ID")]
    pub(crate) controller_id: String,
    /// Pool the operation targets.
    #[arg(long, env = "GARM_POOL_ID", value_name = "ID", default_value = "")]
    pub(crate) pool_id: String,
    /// Instance name or identifier the operation targets.
    #[arg(long, env = "GARM_INSTANCE_ID", value_name = "NAME_OR_ID", default_value = "")]
    pub(crate) instance_id: String,
}
