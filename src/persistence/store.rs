//! SQLite-based persistence store

use crate::core::PipelineStatus;
use crate::persistence::{ExecutionSummary, PersistenceBackend};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const SELECT_RUNS: &str = r#"
    SELECT id, workflow_name, revision, status, started_at, completed_at,
           total_jobs, passed_jobs, failed_jobs, cancelled_jobs
    FROM runs
"#;

/// SQLite run history store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Open (creating if needed) the database at `db_path`; `:memory:` is accepted
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let options = if db_path == Path::new(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Default database location
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("matrixci")
            .join("history.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = Self::default_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                revision TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                total_jobs INTEGER NOT NULL DEFAULT 0,
                passed_jobs INTEGER NOT NULL DEFAULT 0,
                failed_jobs INTEGER NOT NULL DEFAULT 0,
                cancelled_jobs INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_workflow_name ON runs(workflow_name);
            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn status_str(status: PipelineStatus) -> &'static str {
        match status {
            PipelineStatus::Passed => "passed",
            PipelineStatus::Failed => "failed",
        }
    }

    fn parse_status(value: &str) -> Result<PipelineStatus> {
        match value {
            "passed" => Ok(PipelineStatus::Passed),
            "failed" => Ok(PipelineStatus::Failed),
            other => Err(anyhow!("Unknown run status in history: {}", other)),
        }
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        Ok(ExecutionSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workflow_name: row.get("workflow_name"),
            revision: row.get("revision"),
            status: Self::parse_status(&row.get::<String, _>("status"))?,
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: Self::from_naive(row.get("completed_at")),
            total_jobs: row.get::<i64, _>("total_jobs") as usize,
            passed_jobs: row.get::<i64, _>("passed_jobs") as usize,
            failed_jobs: row.get::<i64, _>("failed_jobs") as usize,
            cancelled_jobs: row.get::<i64, _>("cancelled_jobs") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_run(&self, run: &ExecutionSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, workflow_name, revision, status, started_at, completed_at,
             total_jobs, passed_jobs, failed_jobs, cancelled_jobs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.workflow_name)
        .bind(&run.revision)
        .bind(Self::status_str(run.status))
        .bind(run.started_at.naive_utc())
        .bind(run.completed_at.naive_utc())
        .bind(run.total_jobs as i64)
        .bind(run.passed_jobs as i64)
        .bind(run.failed_jobs as i64)
        .bind(run.cancelled_jobs as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, workflow_name: Option<&str>) -> Result<Vec<ExecutionSummary>> {
        let rows = match workflow_name {
            Some(name) => {
                sqlx::query(&format!(
                    "{} WHERE workflow_name = ?1 ORDER BY started_at DESC",
                    SELECT_RUNS
                ))
                .bind(name)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} ORDER BY started_at DESC", SELECT_RUNS))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_workflows(&self) -> Result<Vec<(String, usize)>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_name, COUNT(*) AS runs
            FROM runs
            GROUP BY workflow_name
            ORDER BY workflow_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list workflows")?;

        Ok(rows
            .iter()
            .map(|row| (row.get("workflow_name"), row.get::<i64, _>("runs") as usize))
            .collect())
    }
}
