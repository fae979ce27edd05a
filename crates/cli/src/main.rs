//! CLI binary to install a product and manage test nodes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod args;
mod goals;

use clap::Parser;
use testbed_runner::ShutdownHooks;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Goal};

/// Exit status after an interrupted run.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Product installation failed
    #[error(transparent)]
    Install(#[from] testbed_installer::Error),

    /// Node management failed
    #[error(transparent)]
    Orchestrator(#[from] testbed_orchestrator::Error),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let goal = run(cli.goal);
    tokio::pin!(goal);

    // The goal stays alive but unpolled while the hooks run, so the hooks it
    // registered stay registered and an aborted goal cannot end the process.
    tokio::select! {
        biased;
        () = wait_for_signal() => {
            info!("Shutting down, running cleanup");
            ShutdownHooks::global().run_all().await;

            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        result = &mut goal => result,
    }
}

async fn run(goal: Goal) -> Result<(), Error> {
    match goal {
        Goal::InstallProduct(args) => goals::install_product(args).await,
        Goal::StartNodes(args) => goals::start_nodes(args).await,
        Goal::StopNodes(args) => goals::stop_nodes(args).await,
        Goal::Administer(args) => goals::administer(args).await,
        Goal::DeployFragment(args) => goals::deploy_fragment(args).await,
    }
}

async fn wait_for_signal() {
    if cfg!(unix) {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    } else {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt signal");
    }
}
