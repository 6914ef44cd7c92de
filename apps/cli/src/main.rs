//! Sourcestream CLI — streaming web research for content outlines.
//!
//! Takes an outline, researches every heading and subsection concurrently,
//! and streams progress events as they happen.

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
