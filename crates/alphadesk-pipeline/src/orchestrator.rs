//! Daily pipeline orchestrator
//!
//! Drives one decision cycle: fetch inputs, check feature drift, construct
//! target weights, execute the rebalance, persist the audit trail. Stages
//! run strictly in sequence; a stage failure marks the run FAILED after the
//! best-effort persistence of what was produced so far.

use crate::providers::{RiskBundle, RiskProvider, SignalBundle, SignalProvider};
use alphadesk_core::{
    AppConfig, ConstructorMethod, DriftReport, DriftSeverity, PipelineError, PipelineRun, Stage,
    StageStatus, TargetWeights,
};
use alphadesk_execution::{BrokerConnector, RebalanceAction, RebalanceExecutor};
use alphadesk_monitor::DriftMonitor;
use alphadesk_persistence::{
    ArtifactStore, Database, DriftReportRepository, RunRepository, TradeLogEntry,
    TradeLogRepository, WeightSnapshotRepository,
};
use alphadesk_portfolio::{
    derive_clusters, ClusterCapEnforcer, ConvexOptimizer, CovarianceEstimator,
    HeuristicConstructor, OptimizerOutcome,
};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How far back the weight fallback will look for a prior artifact.
const FALLBACK_LOOKBACK_DAYS: u32 = 7;

/// Runs the daily decision cycle.
pub struct PipelineOrchestrator {
    config: AppConfig,
    db: Database,
    artifacts: ArtifactStore,
    signals: Arc<dyn SignalProvider>,
    risk: Arc<dyn RiskProvider>,
    broker: Option<Arc<dyn BrokerConnector>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: AppConfig,
        db: Database,
        artifacts: ArtifactStore,
        signals: Arc<dyn SignalProvider>,
        risk: Arc<dyn RiskProvider>,
    ) -> Self {
        Self {
            config,
            db,
            artifacts,
            signals,
            risk,
            broker: None,
        }
    }

    /// Attach a broker connector. Required for PAPER and LIVE modes.
    pub fn with_broker(mut self, broker: Arc<dyn BrokerConnector>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Run the pipeline for one trading date.
    ///
    /// The run record is persisted STARTED before any stage executes and
    /// updated with the terminal status afterward, so an operator can always
    /// see what a crashed run was doing.
    pub async fn run(&self, date: NaiveDate) -> Result<PipelineRun, PipelineError> {
        let run_id = format!("{}-{}", date.format("%Y%m%d"), Uuid::new_v4());
        let mode = self.config.pipeline.mode;
        let mut run = PipelineRun::start(run_id, date, mode.to_string());
        info!(run_id = %run.run_id, date = %date, mode = %mode, "Pipeline run started");
        RunRepository::new(&self.db).upsert(&run).await?;

        match self.run_stages(date, &mut run).await {
            Ok(()) => {
                run.finish_success();
                RunRepository::new(&self.db).upsert(&run).await?;
                info!(run_id = %run.run_id, "Pipeline run succeeded");
                Ok(run)
            }
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "Pipeline run failed");
                run.finish_failed(e.to_string());
                if let Err(persist_err) = RunRepository::new(&self.db).upsert(&run).await {
                    error!(error = %persist_err, "Failed to persist failed run record");
                }
                self.persist_failure_report(&run, date).await;
                self.apply_weight_fallback(date);
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        date: NaiveDate,
        run: &mut PipelineRun,
    ) -> Result<(), PipelineError> {
        // Signals
        run.set_stage(Stage::Signals, StageStatus::Running);
        let (signal, risk) = match self.fetch_inputs(date).await {
            Ok(inputs) => {
                run.set_stage(Stage::Signals, StageStatus::Ok);
                inputs
            }
            Err(e) => {
                run.set_stage(Stage::Signals, StageStatus::Failed);
                return Err(e);
            }
        };

        // Drift check. Advisory: severities are logged and persisted, the
        // run proceeds regardless.
        run.set_stage(Stage::DriftCheck, StageStatus::Running);
        let monitor = DriftMonitor::new(self.config.drift.clone());
        let report =
            monitor.check_feature_drift(&signal.baseline, &signal.features, &signal.monitored_features);
        let severity = monitor.report_severity(&report);
        info!(features = report.psi.len(), severity = ?severity, "Drift check complete");
        if let Err(e) = DriftReportRepository::new(&self.db)
            .insert(&run.run_id, date, severity, &report)
            .await
        {
            warn!(error = %e, "Failed to persist drift report");
        }
        run.set_stage(Stage::DriftCheck, StageStatus::Ok);

        // Construct
        run.set_stage(Stage::Construct, StageStatus::Running);
        let weights = match self.construct(date, &signal, &risk).await {
            Ok(weights) => {
                run.set_stage(Stage::Construct, StageStatus::Ok);
                weights
            }
            Err(e) => {
                run.set_stage(Stage::Construct, StageStatus::Failed);
                return Err(e);
            }
        };
        info!(
            positions = weights.len(),
            gross = weights.total(),
            "Target weights constructed"
        );

        // Execute
        if self.config.pipeline.mode.submits_orders() {
            run.set_stage(Stage::Execute, StageStatus::Running);
            match self.execute(&run.run_id, &weights).await {
                Ok(()) => run.set_stage(Stage::Execute, StageStatus::Ok),
                Err(e) => {
                    run.set_stage(Stage::Execute, StageStatus::Failed);
                    return Err(e);
                }
            }
        } else {
            info!(mode = %self.config.pipeline.mode, "Execution skipped");
            run.set_stage(Stage::Execute, StageStatus::Skipped);
        }

        // Report: snapshot + artifact for downstream consumers and for
        // tomorrow's turnover penalty
        run.set_stage(Stage::Report, StageStatus::Running);
        match self.persist_weights(date, &run.run_id, &weights).await {
            Ok(()) => run.set_stage(Stage::Report, StageStatus::Ok),
            Err(e) => {
                run.set_stage(Stage::Report, StageStatus::Failed);
                return Err(e);
            }
        }

        Ok(())
    }

    async fn fetch_inputs(
        &self,
        date: NaiveDate,
    ) -> Result<(SignalBundle, RiskBundle), PipelineError> {
        let signal = self.signals.signals(date).await?;
        let risk = self.risk.risk(date).await?;
        info!(
            symbols = signal.alpha.len(),
            risk_rows = risk.risk.len(),
            "Inputs fetched"
        );
        Ok((signal, risk))
    }

    async fn construct(
        &self,
        date: NaiveDate,
        signal: &SignalBundle,
        risk: &RiskBundle,
    ) -> Result<TargetWeights, PipelineError> {
        let raw = match self.config.portfolio.method {
            ConstructorMethod::Heuristic => HeuristicConstructor::new(self.config.portfolio.clone())
                .construct(&signal.alpha, &risk.risk),
            ConstructorMethod::Convex => {
                let prev = WeightSnapshotRepository::new(&self.db)
                    .latest_before(date)
                    .await?
                    .map(|snapshot| snapshot.weights);
                let optimizer = ConvexOptimizer::new(
                    self.config.portfolio.clone(),
                    self.config.optimizer.clone(),
                    CovarianceEstimator::new(self.config.covariance.clone()),
                );
                let (weights, info) = optimizer.optimize(
                    &signal.alpha,
                    &risk.returns,
                    prev.as_ref(),
                    self.config.portfolio.gross_exposure,
                );
                info!(
                    status = %info.solver_status,
                    turnover = info.turnover,
                    positions = info.positions,
                    objective = info.objective,
                    "Optimizer finished"
                );
                if let OptimizerOutcome::Fallback { reason } = &info.outcome {
                    warn!(reason = %reason, "Optimizer fell back to equal weights");
                }
                weights
            }
        };

        let capped = if self.config.cluster.enabled {
            let clusters = derive_clusters(
                &risk.returns,
                self.config.covariance.lookback,
                self.config.cluster.correlation_threshold,
            );
            ClusterCapEnforcer::new(self.config.cluster.clone()).apply_caps(&raw, &clusters)
        } else {
            raw
        };

        // hard gate: nothing invalid reaches the executor or persistence
        capped.validate(
            self.config.portfolio.max_weight,
            self.config.portfolio.gross_exposure,
        )?;
        Ok(capped)
    }

    async fn execute(&self, run_id: &str, weights: &TargetWeights) -> Result<(), PipelineError> {
        let broker = self.broker.clone().ok_or_else(|| PipelineError::StageFailed {
            stage: Stage::Execute.to_string(),
            message: "no broker connector configured".into(),
        })?;

        let executor = RebalanceExecutor::new(broker, self.config.execution.clone());
        let report = executor.execute(weights).await?;

        let log = TradeLogRepository::new(&self.db);
        for detail in &report.details {
            let entry = TradeLogEntry {
                run_id: run_id.to_string(),
                symbol: detail.symbol.clone(),
                action: action_label(&detail.action).to_string(),
                order_id: detail.order_id.clone(),
                error: detail.error.clone(),
            };
            if let Err(e) = log.insert(&entry).await {
                warn!(symbol = %detail.symbol, error = %e, "Failed to persist trade log entry");
            }
        }
        Ok(())
    }

    async fn persist_weights(
        &self,
        date: NaiveDate,
        run_id: &str,
        weights: &TargetWeights,
    ) -> Result<(), PipelineError> {
        let method = match self.config.portfolio.method {
            ConstructorMethod::Heuristic => "heuristic",
            ConstructorMethod::Convex => "convex",
        };
        WeightSnapshotRepository::new(&self.db)
            .put(date, run_id, method, weights)
            .await?;
        self.artifacts.write_weights(date, run_id, weights)?;
        Ok(())
    }

    /// Every run leaves a monitoring record, FAILED ones included. When the
    /// drift check never completed, an empty report stands in so monitoring
    /// sees the date rather than a gap.
    async fn persist_failure_report(&self, run: &PipelineRun, date: NaiveDate) {
        if run.stage(Stage::DriftCheck) == StageStatus::Ok {
            return;
        }
        let empty = DriftReport::default();
        if let Err(e) = DriftReportRepository::new(&self.db)
            .insert(&run.run_id, date, DriftSeverity::Stable, &empty)
            .await
        {
            warn!(error = %e, "Failed to persist monitoring report for failed run");
        }
    }

    /// On a failed run, optionally carry the prior day's book forward.
    /// Copies an existing artifact only; weights are never fabricated.
    fn apply_weight_fallback(&self, date: NaiveDate) {
        if !self.config.pipeline.allow_fallback_weights {
            return;
        }
        if self.artifacts.exists(date) {
            return;
        }
        match self.artifacts.copy_forward(date, FALLBACK_LOOKBACK_DAYS) {
            Ok(source) => warn!(from = %source, to = %date, "Fallback weights in effect"),
            Err(e) => error!(error = %e, "Weight fallback unavailable"),
        }
    }
}

fn action_label(action: &RebalanceAction) -> &'static str {
    match action {
        RebalanceAction::Buy(_) => "buy",
        RebalanceAction::SellPartial(_) => "sell",
        RebalanceAction::Close => "close",
    }
}
