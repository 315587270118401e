//! dumpsift CLI: stealer-log ingestion, wallet enrichment, and supervision.
//!
//! `dumpsift supervise` runs the background units; `intake` and `enrich`
//! are the units themselves and can also be run in the foreground.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
