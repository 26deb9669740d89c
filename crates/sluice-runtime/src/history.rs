//! Job history
//!
//! Every launch that gets past settings resolution records one
//! [`JobExecutionRecord`]. History is observational: the launcher logs
//! history failures and never lets them change a job's result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::HistoryError;
use crate::job::JobStatus;

/// Aggregate metrics of one job execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub work_units: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub tasks_cancelled: usize,
    pub records_extracted: u64,
    /// Records written, indexed by branch
    pub records_written: Vec<u64>,
    pub records_flagged: u64,
    pub files_published: usize,
    pub peak_in_flight_slots: usize,
    pub cleanup_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub job_id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub metrics: JobMetrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobHistoryStore: Send + Sync {
    async fn open(&self) -> Result<(), HistoryError>;

    async fn close(&self) -> Result<(), HistoryError>;

    async fn record_job_outcome(&self, record: &JobExecutionRecord) -> Result<(), HistoryError>;
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<JobExecutionRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn records(&self) -> Vec<JobExecutionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobHistoryStore for MemoryHistoryStore {
    async fn open(&self) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn record_job_outcome(&self, record: &JobExecutionRecord) -> Result<(), HistoryError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS job_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    job_name TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    metrics TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT NOT NULL
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_job_executions_name ON job_executions (job_name)";

/// SQLite-backed history
///
/// Accepts any sqlx SQLite URL, including `sqlite::memory:`.
pub struct SqliteHistoryStore {
    url: String,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteHistoryStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<SqlitePool, HistoryError> {
        self.pool.read().await.clone().ok_or(HistoryError::NotOpen)
    }

    /// Executions of a job name, newest first
    pub async fn executions(&self, job_name: &str) -> Result<Vec<JobExecutionRecord>, HistoryError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT job_id, job_name, status, error, metrics, started_at, completed_at
            FROM job_executions WHERE job_name = ?1
            ORDER BY id DESC
            "#,
        )
        .bind(job_name)
        .fetch_all(&pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let metrics: String = row.get("metrics");
                Ok(JobExecutionRecord {
                    job_id: row.get("job_id"),
                    job_name: row.get("job_name"),
                    status: JobStatus::from(row.get::<String, _>("status")),
                    error: row.get("error"),
                    metrics: serde_json::from_str(&metrics)?,
                    started_at: row.get("started_at"),
                    completed_at: row.get("completed_at"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl JobHistoryStore for SqliteHistoryStore {
    async fn open(&self) -> Result<(), HistoryError> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let options = SqliteConnectOptions::from_str(&self.url)?.create_if_missing(true);
        // A single long-lived connection keeps `sqlite::memory:` databases alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_INDEX).execute(&pool).await?;

        info!(url = %self.url, "Opened job history store");
        *guard = Some(pool);
        Ok(())
    }

    async fn close(&self) -> Result<(), HistoryError> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            debug!(url = %self.url, "Closed job history store");
        }
        Ok(())
    }

    async fn record_job_outcome(&self, record: &JobExecutionRecord) -> Result<(), HistoryError> {
        let pool = self.pool().await?;
        let metrics = serde_json::to_string(&record.metrics)?;

        sqlx::query(
            r#"
            INSERT INTO job_executions
                (job_id, job_name, status, error, metrics, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.job_name)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(metrics)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(job_id: &str, status: JobStatus) -> JobExecutionRecord {
        JobExecutionRecord {
            job_id: job_id.to_string(),
            job_name: "wiki".to_string(),
            status,
            error: (status == JobStatus::Failed).then(|| "boom".to_string()),
            metrics: JobMetrics {
                work_units: 4,
                tasks_succeeded: 4,
                records_extracted: 40,
                records_written: vec![40, 40],
                files_published: 8,
                peak_in_flight_slots: 2,
                ..Default::default()
            },
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_records() {
        let store = MemoryHistoryStore::new();
        store.open().await.unwrap();
        store
            .record_job_outcome(&record("job_wiki_1", JobStatus::Succeeded))
            .await
            .unwrap();
        assert_eq!(store.records().len(), 1);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteHistoryStore::new("sqlite::memory:");
        store.open().await.unwrap();

        store
            .record_job_outcome(&record("job_wiki_1", JobStatus::Succeeded))
            .await
            .unwrap();
        store
            .record_job_outcome(&record("job_wiki_2", JobStatus::Failed))
            .await
            .unwrap();

        let executions = store.executions("wiki").await.unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].job_id, "job_wiki_2");
        assert_eq!(executions[0].status, JobStatus::Failed);
        assert_eq!(executions[0].error.as_deref(), Some("boom"));
        assert_eq!(executions[1].metrics.records_written, vec![40, 40]);

        store.close().await.unwrap();
        assert!(matches!(
            store.executions("wiki").await,
            Err(HistoryError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_sqlite_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("history.db").display());

        let store = SqliteHistoryStore::new(&url);
        store.open().await.unwrap();
        store
            .record_job_outcome(&record("job_wiki_1", JobStatus::Cancelled))
            .await
            .unwrap();
        store.close().await.unwrap();

        let reopened = SqliteHistoryStore::new(&url);
        reopened.open().await.unwrap();
        let executions = reopened.executions("wiki").await.unwrap();
        assert_eq!(executions[0].status, JobStatus::Cancelled);
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_before_open_fails() {
        let store = SqliteHistoryStore::new("sqlite::memory:");
        assert!(matches!(
            store
                .record_job_outcome(&record("job_wiki_1", JobStatus::Succeeded))
                .await,
            Err(HistoryError::NotOpen)
        ));
    }
}
