use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use readsync::app::AppContext;
use readsync::cli::{commands, Cli, Commands};
use readsync::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries daemon responses.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = AppContext::new(config, cli.db, cli.token)?;

    match cli.command {
        Commands::Run {
            retry_interval,
            no_initial_drain,
        } => {
            commands::run_daemon(&ctx, retry_interval.as_deref(), no_initial_drain).await?;
        }
        Commands::Ingest { json } => {
            commands::ingest(&ctx, &json).await?;
        }
        Commands::Drain => {
            commands::drain(&ctx).await?;
        }
        Commands::Status => {
            commands::status(&ctx).await?;
        }
        Commands::Positions { unsynced } => {
            commands::list_positions(&ctx, unsynced)?;
        }
        Commands::Prune => {
            commands::prune(&ctx)?;
        }
    }

    Ok(())
}
