//! Report CLI command for inspecting persisted runs and weights

use alphadesk_persistence::{Database, RunRepository, TradeLogRepository, WeightSnapshotRepository};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};

#[derive(Debug, Args)]
pub struct ReportCommand {
    #[command(subcommand)]
    pub command: ReportSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ReportSubcommand {
    /// Show recent pipeline runs
    Runs(RunsArgs),
    /// Show the target weights stored for a date
    Weights(WeightsArgs),
    /// Show the orders submitted by a run
    Trades(TradesArgs),
}

#[derive(Debug, Args)]
pub struct RunsArgs {
    /// Number of runs to show
    #[arg(long, short, default_value_t = 10)]
    pub limit: i64,

    /// Path to database file
    #[arg(long, default_value = "data/alphadesk.db")]
    pub db_path: String,
}

#[derive(Debug, Args)]
pub struct WeightsArgs {
    /// Trading date (YYYY-MM-DD)
    #[arg(long)]
    pub date: NaiveDate,

    /// Path to database file
    #[arg(long, default_value = "data/alphadesk.db")]
    pub db_path: String,
}

#[derive(Debug, Args)]
pub struct TradesArgs {
    /// Run id
    #[arg(long)]
    pub run_id: String,

    /// Path to database file
    #[arg(long, default_value = "data/alphadesk.db")]
    pub db_path: String,
}

impl ReportCommand {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            ReportSubcommand::Runs(args) => show_runs(args).await,
            ReportSubcommand::Weights(args) => show_weights(args).await,
            ReportSubcommand::Trades(args) => show_trades(args).await,
        }
    }
}

async fn show_runs(args: &RunsArgs) -> Result<()> {
    let db = Database::new(&args.db_path)
        .await
        .context("Failed to connect to database")?;
    let runs = RunRepository::new(&db).recent(args.limit).await?;

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").add_attribute(Attribute::Bold),
            Cell::new("Date").add_attribute(Attribute::Bold),
            Cell::new("Mode").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("Started").add_attribute(Attribute::Bold),
            Cell::new("Error").add_attribute(Attribute::Bold),
        ]);

    for run in &runs {
        table.add_row(vec![
            Cell::new(&run.run_id),
            Cell::new(run.date),
            Cell::new(&run.mode),
            Cell::new(run.status),
            Cell::new(run.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(run.error.as_deref().unwrap_or("-")),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn show_weights(args: &WeightsArgs) -> Result<()> {
    let db = Database::new(&args.db_path)
        .await
        .context("Failed to connect to database")?;
    let snapshot = WeightSnapshotRepository::new(&db).get(args.date).await?;

    let Some(snapshot) = snapshot else {
        println!("No weights stored for {}.", args.date);
        return Ok(());
    };

    println!();
    println!(
        "Target weights for {} (run {}, method {})",
        args.date, snapshot.run_id, snapshot.method
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Weight").add_attribute(Attribute::Bold),
        ]);

    for (symbol, weight) in snapshot.weights.iter() {
        table.add_row(vec![
            Cell::new(symbol),
            Cell::new(format!("{:.4}", weight)),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL").add_attribute(Attribute::Bold),
        Cell::new(format!("{:.4}", snapshot.weights.total())).add_attribute(Attribute::Bold),
    ]);

    println!("{table}");
    Ok(())
}

async fn show_trades(args: &TradesArgs) -> Result<()> {
    let db = Database::new(&args.db_path)
        .await
        .context("Failed to connect to database")?;
    let entries = TradeLogRepository::new(&db).for_run(&args.run_id).await?;

    if entries.is_empty() {
        println!("No orders logged for run {}.", args.run_id);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Symbol").add_attribute(Attribute::Bold),
            Cell::new("Action").add_attribute(Attribute::Bold),
            Cell::new("Order ID").add_attribute(Attribute::Bold),
            Cell::new("Error").add_attribute(Attribute::Bold),
        ]);

    for entry in &entries {
        table.add_row(vec![
            Cell::new(&entry.symbol),
            Cell::new(&entry.action),
            Cell::new(entry.order_id.as_deref().unwrap_or("-")),
            Cell::new(entry.error.as_deref().unwrap_or("-")),
        ]);
    }

    println!("{table}");
    Ok(())
}
