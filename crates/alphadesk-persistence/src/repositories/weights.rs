//! Target weight snapshot repository

use crate::{db_err, Database, Result};
use alphadesk_core::TargetWeights;
use chrono::{NaiveDate, Utc};
use sqlx::Row;
use std::collections::BTreeMap;

/// One persisted weight vector.
#[derive(Debug, Clone)]
pub struct WeightSnapshot {
    pub run_date: NaiveDate,
    pub run_id: String,
    pub method: String,
    pub weights: TargetWeights,
}

/// Repository for daily target weights
pub struct WeightSnapshotRepository<'a> {
    db: &'a Database,
}

impl<'a> WeightSnapshotRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Store the weights for a date; a re-run replaces the earlier snapshot.
    pub async fn put(
        &self,
        date: NaiveDate,
        run_id: &str,
        method: &str,
        weights: &TargetWeights,
    ) -> Result<()> {
        let payload = serde_json::to_string(weights.as_map())?;
        sqlx::query(
            r#"
            INSERT INTO weight_snapshots (run_date, run_id, method, weights, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(run_date) DO UPDATE SET
                run_id = excluded.run_id,
                method = excluded.method,
                weights = excluded.weights,
                created_at = excluded.created_at
            "#,
        )
        .bind(date.to_string())
        .bind(run_id)
        .bind(method)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Load the weights stored for a date
    pub async fn get(&self, date: NaiveDate) -> Result<Option<WeightSnapshot>> {
        let row = sqlx::query("SELECT * FROM weight_snapshots WHERE run_date = ?")
            .bind(date.to_string())
            .fetch_optional(self.db.pool())
            .await
            .map_err(db_err)?;

        row.map(|r| {
            let map: BTreeMap<String, f64> = serde_json::from_str(r.get::<&str, _>("weights"))?;
            Ok(WeightSnapshot {
                run_date: date,
                run_id: r.get("run_id"),
                method: r.get("method"),
                weights: TargetWeights::new(map),
            })
        })
        .transpose()
    }

    /// Most recent snapshot strictly before the given date, if any.
    /// Used to seed the turnover penalty with yesterday's book.
    pub async fn latest_before(&self, date: NaiveDate) -> Result<Option<WeightSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM weight_snapshots WHERE run_date < ? ORDER BY run_date DESC LIMIT 1",
        )
        .bind(date.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err)?;

        row.map(|r| {
            let map: BTreeMap<String, f64> = serde_json::from_str(r.get::<&str, _>("weights"))?;
            let run_date = r
                .get::<String, _>("run_date")
                .parse::<NaiveDate>()
                .map_err(|e| {
                    alphadesk_core::PersistenceError::DatabaseError(format!("run_date: {e}"))
                })?;
            Ok(WeightSnapshot {
                run_date,
                run_id: r.get("run_id"),
                method: r.get("method"),
                weights: TargetWeights::new(map),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f64)]) -> TargetWeights {
        TargetWeights::new(pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect())
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let repo = WeightSnapshotRepository::new(&db);

        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let w = weights(&[("AAPL", 0.6), ("MSFT", 0.4)]);
        repo.put(date, "run-1", "heuristic", &w).await.unwrap();

        let snap = repo.get(date).await.unwrap().unwrap();
        assert_eq!(snap.run_id, "run-1");
        assert_eq!(snap.weights.get("AAPL"), Some(0.6));
    }

    #[tokio::test]
    async fn latest_before_skips_same_day() {
        let db = Database::in_memory().await.unwrap();
        let repo = WeightSnapshotRepository::new(&db);

        let d1 = NaiveDate::from_ymd_opt(2025, 3, 13).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        repo.put(d1, "run-a", "convex", &weights(&[("AAPL", 1.0)]))
            .await
            .unwrap();
        repo.put(d2, "run-b", "convex", &weights(&[("MSFT", 1.0)]))
            .await
            .unwrap();

        let prev = repo.latest_before(d2).await.unwrap().unwrap();
        assert_eq!(prev.run_id, "run-a");
        assert_eq!(prev.run_date, d1);
        assert!(repo.latest_before(d1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rerun_replaces_snapshot() {
        let db = Database::in_memory().await.unwrap();
        let repo = WeightSnapshotRepository::new(&db);

        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        repo.put(date, "run-1", "heuristic", &weights(&[("AAPL", 1.0)]))
            .await
            .unwrap();
        repo.put(date, "run-2", "heuristic", &weights(&[("MSFT", 1.0)]))
            .await
            .unwrap();

        let snap = repo.get(date).await.unwrap().unwrap();
        assert_eq!(snap.run_id, "run-2");
        assert!(snap.weights.get("AAPL").is_none());
    }
}
