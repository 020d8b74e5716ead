//! LinkIntel CLI: enrich spreadsheet rows with web-derived lead intelligence.
//!
//! Reads a JSON sheet, discovers URLs per row, fetches and summarizes them
//! politely, scores the result, and writes namespaced columns back in place.

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
