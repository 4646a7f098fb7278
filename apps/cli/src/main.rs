//! sitegen CLI: intake business payloads and turn them into generated sites.
//!
//! Records are accepted immediately and generated asynchronously, either by an
//! inline attempt right after intake or by the `worker` sweep loop.

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
