//! Alphadesk - daily systematic trading pipeline
//!
//! Turns upstream alpha scores and risk estimates into a target portfolio
//! and, in paper or live mode, rebalances a brokerage account onto it.

use alphadesk_pipeline::init_logging_from_env;
use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{report::ReportCommand, run::RunCommand};

mod commands;
mod providers;

#[derive(Debug, Parser)]
#[command(name = "alphadesk", about = "Daily portfolio construction and rebalancing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily pipeline for one trading date
    Run(RunCommand),
    /// Inspect persisted runs and weights
    Report(ReportCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging_from_env();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(cmd) => cmd.run().await,
        Command::Report(cmd) => cmd.run().await,
    }
}
