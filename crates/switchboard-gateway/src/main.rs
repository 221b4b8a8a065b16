use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod relay;
mod shutdown;
mod verify;

use cli::{Cli, Command, DEFAULT_FILTER};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // explicit --log-level > RUST_LOG > default
    let filter = match cli.log_level {
        Some(level) => EnvFilter::new(level.filter()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Verify(args) => verify::run(args).await,
        Command::Relay(args) => relay::run(cli.config.as_deref(), args).await,
    }
}
