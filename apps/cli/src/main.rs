//! triagesync CLI — keeps a remote knowledge base synchronized with the
//! top-N ultimate-parent tickets of an issue tracker's duplicate hierarchy.

mod commands;
mod interactive;

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
