mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use genrelay::config::Config;
use genrelay::context::AppContext;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let context = AppContext::build(config)?;

    let outcome = match cli.command {
        Commands::Serve(args) => commands::serve(&context, args.address).await,
        Commands::Generate(args) => commands::generate(&context, args).await,
        Commands::Batch(args) => commands::batch(&context, args).await,
    };

    // Ship whatever is still buffered before exit.
    context.logger.shutdown().await;

    outcome
}
