//! Copilot CLI: evidence-gated answers to business questions over a local
//! document collection.
//!
//! Plans sub-questions, researches them against the indexed corpus, drafts a
//! cited deliverable, and fact-checks it before printing.

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
