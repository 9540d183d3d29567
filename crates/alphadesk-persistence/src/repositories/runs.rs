//! Pipeline run repository

use crate::{db_err, Database, Result};
use alphadesk_core::{PersistenceError, PipelineRun, RunStatus, Stage, StageStatus};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use std::collections::BTreeMap;

/// Repository for pipeline run audit records
pub struct RunRepository<'a> {
    db: &'a Database,
}

impl<'a> RunRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert or update a run record. Upsert keyed on run_id so the
    /// orchestrator can write STARTED first and the terminal status later.
    pub async fn upsert(&self, run: &PipelineRun) -> Result<()> {
        let stages = serde_json::to_string(&run.stages)?;
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (
                run_id, run_date, mode, status, stages, error, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                stages = excluded.stages,
                error = excluded.error,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(&run.run_id)
        .bind(run.date.to_string())
        .bind(&run.mode)
        .bind(run.status.to_string())
        .bind(stages)
        .bind(&run.error)
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|t| t.to_rfc3339()))
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Get a run by its id
    pub async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>> {
        let row = sqlx::query("SELECT * FROM pipeline_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(db_err)?;

        row.map(|r| Self::row_to_run(&r)).transpose()
    }

    /// Most recent runs, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query("SELECT * FROM pipeline_runs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.db.pool())
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::row_to_run).collect()
    }

    /// Runs for one trading date
    pub async fn for_date(&self, date: NaiveDate) -> Result<Vec<PipelineRun>> {
        let rows =
            sqlx::query("SELECT * FROM pipeline_runs WHERE run_date = ? ORDER BY started_at")
                .bind(date.to_string())
                .fetch_all(self.db.pool())
                .await
                .map_err(db_err)?;

        rows.iter().map(Self::row_to_run).collect()
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<PipelineRun> {
        let status = match row.get::<String, _>("status").as_str() {
            "STARTED" => RunStatus::Started,
            "SUCCESS" => RunStatus::Success,
            _ => RunStatus::Failed,
        };
        let stages: BTreeMap<Stage, StageStatus> =
            serde_json::from_str(row.get::<&str, _>("stages"))?;
        let date = row
            .get::<String, _>("run_date")
            .parse::<NaiveDate>()
            .map_err(|e| PersistenceError::DatabaseError(format!("run_date: {e}")))?;

        Ok(PipelineRun {
            run_id: row.get("run_id"),
            date,
            mode: row.get("mode"),
            status,
            stages,
            error: row.get("error"),
            started_at: parse_timestamp(row.get::<&str, _>("started_at"))?,
            finished_at: row
                .get::<Option<String>, _>("finished_at")
                .map(|t| parse_timestamp(&t))
                .transpose()?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::DatabaseError(format!("timestamp: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_finish_updates_in_place() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(&db);

        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let mut run = PipelineRun::start("run-1".into(), date, "SIMULATION".into());
        repo.upsert(&run).await.unwrap();

        run.set_stage(Stage::Signals, StageStatus::Ok);
        run.finish_success();
        repo.upsert(&run).await.unwrap();

        let loaded = repo.get("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
        assert_eq!(loaded.stage(Stage::Signals), StageStatus::Ok);
        assert_eq!(loaded.stage(Stage::Execute), StageStatus::Pending);
        assert!(loaded.finished_at.is_some());

        // still one row
        assert_eq!(repo.for_date(date).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_run_round_trips_error() {
        let db = Database::in_memory().await.unwrap();
        let repo = RunRepository::new(&db);

        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let mut run = PipelineRun::start("run-2".into(), date, "PAPER".into());
        run.finish_failed("covariance blew up".into());
        repo.upsert(&run).await.unwrap();

        let loaded = repo.get("run-2").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("covariance blew up"));
    }
}
