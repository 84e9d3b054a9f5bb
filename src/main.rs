mod cli;
mod config;
mod jobs;
mod paging;
mod provider;
mod reconcile;
mod scheduler;
mod server;
mod state;
mod storage;

use std::process::ExitCode;

use anyhow::Result;
use cli::Args;
use server::Server;
use state::State;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn set_up_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_regex(false)
                .with_default_directive(Level::INFO.into())
                .with_env_var("TUBEMIRROR_LOG")
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    set_up_logging();

    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for the interrupt signal: {e}");
                return;
            }

            info!("Shutting down");
            cancel.cancel();
        }
    });

    let mut tasks = match start(cancel.clone()).await {
        Ok(tasks) => tasks,

        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut exit_code = ExitCode::SUCCESS;

    while let Some(task_result) = tasks.join_next().await {
        cancel.cancel();

        match task_result {
            Ok(Ok(())) => {}

            Ok(Err(e)) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }

            Err(e) => {
                error!("{e}");
                exit_code = ExitCode::FAILURE;
            }
        }
    }

    exit_code
}

async fn start(cancel: CancellationToken) -> Result<JoinSet<Result<()>>> {
    let mut args = Args::parse();
    let config_paths = args
        .config_path
        .take()
        .into_iter()
        .chain(["./tubemirror.toml".into(), "/etc/tubemirror.toml".into()])
        .collect::<Vec<_>>();
    let mut config = config::load(&config_paths)?;
    config.update(args);

    let (state, scheduler) = State::new(config, cancel.clone()).await?;
    let server = Server::new(state).await?;

    let mut tasks = JoinSet::new();
    tasks.spawn(scheduler.run());
    tasks.spawn(server.serve(cancel.clone()));

    Ok(tasks)
}
