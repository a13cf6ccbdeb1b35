mod cli;
mod logging;

use clap::Parser;
use cli::{Cli, Command};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::process::ExitCode;
use std::time::Duration;

const METRICS_UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error(transparent)]
    Apiserver(#[from] apiserver::ApiserverError),

    #[error(transparent)]
    Agent(#[from] agent::AgentError),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    // Sentry must be initialised before the runtime starts its threads.
    let _sentry = logging::init(&cli.logging);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting with error");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), RunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match command {
            Command::Apiserver(args) => {
                tracing::info!("Starting apiserver");
                let prometheus = install_metrics()?;
                let shutdown = shared::shutdown::shutdown_token();
                apiserver::run(args.into(), shutdown, Some(prometheus)).await?;
            }
            Command::ClusterController(args) => {
                tracing::info!("Starting cluster controller");
                agent::run_cluster_controller(args.into()).await?;
            }
            Command::SyncController(args) => {
                tracing::info!("Starting sync controller");
                agent::run_sync_controller(args.into()).await?;
            }
        }
        Ok(())
    })
}

fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    for defs in [
        queue::metrics_defs::ALL_METRICS,
        store::metrics_defs::ALL_METRICS,
        apiserver::metrics_defs::ALL_METRICS,
    ] {
        shared::metrics_defs::describe_all(defs);
    }

    let upkeep = handle.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_UPKEEP_INTERVAL);
        loop {
            interval.tick().await;
            upkeep.run_upkeep();
        }
    });
    Ok(handle)
}
