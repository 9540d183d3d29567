//! Trade log repository

use crate::{db_err, Database, Result};
use chrono::Utc;
use sqlx::Row;

/// One order attempt from a rebalance cycle.
#[derive(Debug, Clone)]
pub struct TradeLogEntry {
    pub run_id: String,
    pub symbol: String,
    pub action: String,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

/// Repository for the per-run order audit log
pub struct TradeLogRepository<'a> {
    db: &'a Database,
}

impl<'a> TradeLogRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn insert(&self, entry: &TradeLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_log (run_id, symbol, action, order_id, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.run_id)
        .bind(&entry.symbol)
        .bind(&entry.action)
        .bind(&entry.order_id)
        .bind(&entry.error)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Entries for one run, submission order
    pub async fn for_run(&self, run_id: &str) -> Result<Vec<TradeLogEntry>> {
        let rows = sqlx::query("SELECT * FROM trade_log WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(self.db.pool())
            .await
            .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|r| TradeLogEntry {
                run_id: r.get("run_id"),
                symbol: r.get("symbol"),
                action: r.get("action"),
                order_id: r.get("order_id"),
                error: r.get("error"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_preserves_submission_order() {
        let db = Database::in_memory().await.unwrap();
        let repo = TradeLogRepository::new(&db);

        for (symbol, error) in [("AAPL", None), ("MSFT", Some("rejected".to_string()))] {
            repo.insert(&TradeLogEntry {
                run_id: "run-1".into(),
                symbol: symbol.into(),
                action: "buy".into(),
                order_id: error.is_none().then(|| format!("o-{symbol}")),
                error,
            })
            .await
            .unwrap();
        }

        let entries = repo.for_run("run-1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].symbol, "AAPL");
        assert!(entries[1].error.is_some());
        assert!(repo.for_run("run-2").await.unwrap().is_empty());
    }
}
