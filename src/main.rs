//! Binary entry point for the OpenStack external provider.

use std::io::{self, Read, Write};
use std::process;
use std::str::FromStr;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use garm_provider_openstack::{
    BootstrapInstance, Command, Environment, OpenStackProvider, ProviderConfig, ProviderError,
    parse_bootstrap, run,
};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let exit_code = match dispatch(cli, cancel).await {
        Ok(output) => {
            write_output(io::stdout(), &output);
            0
        }
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        warn!("shutdown signal received, cancelling");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}

async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<String, ProviderError> {
    let command = Command::from_str(&cli.command)?;
    let bootstrap = if command == Command::CreateInstance {
        Some(read_bootstrap(io::stdin())?)
    } else {
        None
    };
    let env = Environment {
        command: Some(command),
        controller_id: cli.controller_id,
        pool_id: cli.pool_id,
        instance_id: cli.instance_id,
        bootstrap,
    };
    env.validate()?;

    let config = ProviderConfig::load_without_cli_args()?;
    let provider = OpenStackProvider::connect(&config, &env.controller_id)
        .await?
        .with_cancellation(cancel);
    run(&provider, env).await
}

fn read_bootstrap(mut source: impl Read) -> Result<BootstrapInstance, ProviderError> {
    let mut input = String::new();
    source
        .read_to_string(&mut input)
        .map_err(|err| ProviderError::Validation(format!("failed to read stdin: {err}")))?;
    parse_bootstrap(&input)
}

fn write_output(mut target: impl Write, output: &str) {
    if !output.is_empty() {
        writeln!(target, "{output}").ok();
    }
}

fn report_error(err: &ProviderError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &ProviderError) {
    writeln!(target, "{err}").ok();
}
