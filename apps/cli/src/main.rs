//! foodprint CLI — purchase-ledger environmental-impact pipeline.
//!
//! Converts a purchase worksheet into per-category impact summaries
//! (CO2, land, water, animal lives, calories, eutrophication).

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
