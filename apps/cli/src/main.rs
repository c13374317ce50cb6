//! docflow CLI: run document-processing pipelines from the terminal.
//!
//! Loads a pipeline exported by the editor, optionally sources documents
//! from a directory, runs it, and writes the updated pipeline back out.

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
