//! Drift report repository

use crate::{db_err, Database, Result};
use alphadesk_core::{DriftReport, DriftSeverity};
use chrono::{NaiveDate, Utc};
use sqlx::Row;

/// Repository for per-run drift reports
pub struct DriftReportRepository<'a> {
    db: &'a Database,
}

impl<'a> DriftReportRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        run_id: &str,
        date: NaiveDate,
        severity: DriftSeverity,
        report: &DriftReport,
    ) -> Result<()> {
        let psi = serde_json::to_string(&report.psi)?;
        let severity = match severity {
            DriftSeverity::Stable => "stable",
            DriftSeverity::Material => "material",
            DriftSeverity::Critical => "critical",
        };
        sqlx::query(
            r#"
            INSERT INTO drift_reports (run_id, run_date, severity, psi, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(date.to_string())
        .bind(severity)
        .bind(psi)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Reports for one date, insertion order
    pub async fn for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<(String, DriftSeverity, DriftReport)>> {
        let rows = sqlx::query("SELECT * FROM drift_reports WHERE run_date = ? ORDER BY id")
            .bind(date.to_string())
            .fetch_all(self.db.pool())
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(|r| {
                let severity = match r.get::<String, _>("severity").as_str() {
                    "critical" => DriftSeverity::Critical,
                    "material" => DriftSeverity::Material,
                    _ => DriftSeverity::Stable,
                };
                let psi = serde_json::from_str(r.get::<&str, _>("psi"))?;
                Ok((r.get("run_id"), severity, DriftReport { psi }))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn insert_and_read_back() {
        let db = Database::in_memory().await.unwrap();
        let repo = DriftReportRepository::new(&db);

        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let mut psi = BTreeMap::new();
        psi.insert("momentum".to_string(), 0.31);
        psi.insert("value".to_string(), 0.05);
        let report = DriftReport { psi };

        repo.insert("run-1", date, DriftSeverity::Material, &report)
            .await
            .unwrap();

        let loaded = repo.for_date(date).await.unwrap();
        assert_eq!(loaded.len(), 1);
        let (run_id, severity, report) = &loaded[0];
        assert_eq!(run_id, "run-1");
        assert_eq!(*severity, DriftSeverity::Material);
        assert_eq!(report.psi["momentum"], 0.31);
    }
}
