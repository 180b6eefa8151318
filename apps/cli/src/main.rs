//! Chronicler CLI: research a person's life and print a dated chronology.
//!
//! Drives an agentic research loop over public reference sources and
//! consolidates what it reads into a timeline of biographical events.

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
