//! errscribe CLI — AI research booklets for compiler errors.
//!
//! Feeds raw build output through a multi-stage AI analysis pipeline and
//! persists the composed research booklet.

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
