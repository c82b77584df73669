//! Durable job store backed by SQLite.

use crate::error::{EngineError, EngineResult};
use crate::job::{Job, JobId, JobPriority, JobState};
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY,
    handler      TEXT NOT NULL,
    payload      TEXT,
    priority     INTEGER NOT NULL,
    status       TEXT NOT NULL,
    attempts     INTEGER NOT NULL,
    max_attempts INTEGER NOT NULL,
    scheduled_at INTEGER,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL,
    last_error   TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (status, priority, created_at);
";

/// Relational store with optimistic-concurrency claiming.
///
/// `fetch_next` selects the best due candidate and then performs a
/// conditional update that only succeeds while the row is still pending; a
/// lost race is reported as "no job", never as an error.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open a store at the given SQLite URL and run the schema migration.
    ///
    /// The pool is limited to one connection: SQLite allows a single writer
    /// and one connection keeps claim updates serialized.
    pub async fn connect(url: &str) -> EngineResult<Self> {
        debug!(url, "opening sqlite job store");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Build a store over an existing pool and run the schema migration.
    pub async fn with_pool(pool: SqlitePool) -> EngineResult<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn row_to_job(row: &SqliteRow) -> EngineResult<Job> {
    let id: String = row.try_get("id")?;
    let priority: i64 = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;
    let max_attempts: i64 = row.try_get("max_attempts")?;
    let scheduled_at: Option<i64> = row.try_get("scheduled_at")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(Job {
        id: id
            .parse::<JobId>()
            .map_err(|e| EngineError::Storage(format!("invalid job id '{id}': {e}")))?,
        handler: row.try_get("handler")?,
        payload: row.try_get("payload")?,
        priority: JobPriority::from_repr(priority)
            .ok_or_else(|| EngineError::Storage(format!("invalid priority {priority}")))?,
        status: JobState::parse(&status)
            .ok_or_else(|| EngineError::Storage(format!("invalid status '{status}'")))?,
        attempts: attempts as u32,
        max_attempts: max_attempts as u32,
        scheduled_at: scheduled_at.map(millis_to_datetime),
        created_at: millis_to_datetime(created_at),
        updated_at: millis_to_datetime(updated_at),
        last_error: row.try_get("last_error")?,
    })
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &Job) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO jobs \
             (id, handler, payload, priority, status, attempts, max_attempts, \
              scheduled_at, created_at, updated_at, last_error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(&job.handler)
        .bind(&job.payload)
        .bind(job.priority as i64)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(job.scheduled_at.map(|at| at.timestamp_millis()))
        .bind(job.created_at.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .bind(&job.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_next(&self) -> EngineResult<Option<Job>> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query(
            "SELECT * FROM jobs \
             WHERE status = 'pending' AND (scheduled_at IS NULL OR scheduled_at <= ?) \
             ORDER BY priority ASC, created_at ASC \
             LIMIT 1",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut job = row_to_job(&row)?;

        let claimed = sqlx::query(
            "UPDATE jobs SET status = 'processing', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        // Another worker claimed the row between the select and the update.
        if claimed.rows_affected() == 0 {
            debug!(id = %job.id, "lost claim race");
            return Ok(None);
        }

        job.status = JobState::Processing;
        job.updated_at = millis_to_datetime(now);
        Ok(Some(job))
    }

    async fn get(&self, id: JobId) -> EngineResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn mark_completed(&self, id: JobId) -> EngineResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', updated_at = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> EngineResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = ?, updated_at = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: JobId,
        next_attempt_at: DateTime<Utc>,
        attempts: u32,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'pending', scheduled_at = ?, attempts = ?, updated_at = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(next_attempt_at.timestamp_millis())
        .bind(attempts as i64)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
