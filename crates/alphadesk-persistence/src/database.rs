//! Database connection and schema management

use crate::{db_err, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (or create) the run-history database at the given path.
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let connection_string = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
            .map_err(db_err)?;

        let db = Self { pool };
        db.initialize_schema().await?;

        info!(db_path = %db_path, "Database initialized");
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let db = Self { pool };
        db.initialize_schema().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        // Pipeline run audit trail
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                run_id TEXT PRIMARY KEY,
                run_date TEXT NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                stages TEXT NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Target weight snapshots, one per run date
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS weight_snapshots (
                run_date TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                method TEXT NOT NULL,
                weights TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Per-feature drift scores
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drift_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                run_date TEXT NOT NULL,
                severity TEXT NOT NULL,
                psi TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Orders submitted per run
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                order_id TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_runs_date ON pipeline_runs(run_date);
            CREATE INDEX IF NOT EXISTS idx_drift_date ON drift_reports(run_date);
            CREATE INDEX IF NOT EXISTS idx_trade_log_run ON trade_log(run_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
