//! contactscout CLI: tiered web retrieval of professional contact details.
//!
//! Reads a batch of people, searches escalating tiers of sources for each,
//! and writes one audited result per record.

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
