//! Daily pipeline run command

use crate::providers::{JsonRiskProvider, JsonSignalProvider};
use alphadesk_core::{AppConfig, ExecutionMode};
use alphadesk_execution::AlpacaConnector;
use alphadesk_persistence::{ArtifactStore, Database};
use alphadesk_pipeline::PipelineOrchestrator;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Args;
use std::sync::Arc;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Trading date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Override the configured execution mode (SIMULATION, PAPER, LIVE)
    #[arg(long)]
    pub mode: Option<ExecutionMode>,

    /// Directory containing signals_YYYYMMDD.json and risk_YYYYMMDD.json
    #[arg(long, default_value = "data/inputs")]
    pub data_dir: String,
}

impl RunCommand {
    pub async fn run(self) -> Result<()> {
        let mut config = load_config()?;
        if let Some(mode) = self.mode {
            config.pipeline.mode = mode;
        }
        config.validate().context("Invalid configuration")?;

        let date = self.date.unwrap_or_else(|| Utc::now().date_naive());

        let db = Database::new(&config.persistence.db_path)
            .await
            .context("Failed to open run database")?;
        let artifacts = ArtifactStore::new(&config.persistence.artifacts_dir);
        let signals = Arc::new(JsonSignalProvider::new(&self.data_dir));
        let risk = Arc::new(JsonRiskProvider::new(&self.data_dir));

        let mut orchestrator =
            PipelineOrchestrator::new(config.clone(), db, artifacts, signals, risk);
        if config.pipeline.mode.submits_orders() {
            let broker = AlpacaConnector::from_env(config.execution.clone())
                .context("Broker credentials required for paper/live mode")?;
            orchestrator = orchestrator.with_broker(Arc::new(broker));
        }

        let run = orchestrator.run(date).await?;
        info!(run_id = %run.run_id, status = %run.status, "Run complete");
        Ok(())
    }
}

fn load_config() -> Result<AppConfig> {
    let config_path =
        std::env::var("ALPHADESK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    if std::path::Path::new(&config_path).exists() {
        AppConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load config file: {config_path}"))
    } else {
        info!("Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}
