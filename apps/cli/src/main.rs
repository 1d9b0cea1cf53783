//! noticemerge CLI: assemble procurement notice fragments into releases.
//!
//! Each notice directory holds one JSON fragment per producer; the CLI merges
//! them under a policy table and writes one release per notice.

mod commands;
mod notice;

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
