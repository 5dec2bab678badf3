//! newscrawl CLI: crawl configured news sources into a libSQL article store.
//!
//! Discovers article URLs per source, fetches them on a bounded worker pool,
//! parses and fingerprints them, and upserts new content.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::load_app_config(&cli)?;
    let _log_guard = commands::init_tracing(&cli, &config)?;
    commands::run(cli, config).await
}
