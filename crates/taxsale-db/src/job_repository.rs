use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use taxsale_core::error::{AppError, ErrorClass};
use taxsale_core::job::{ExtractionJob, JobStatus};
use taxsale_core::strategy::Strategy;
use taxsale_core::traits::JobTracker;
use uuid::Uuid;

/// PostgreSQL-backed audit trail of extraction attempts.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<ExtractionJob>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(r#"SELECT * FROM extraction_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(ExtractionJob::try_from).transpose()
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM extraction_jobs WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    document_id: Uuid,
    strategy: String,
    status: String,
    profile_name: Option<String>,
    content_hash: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    records_extracted: i32,
    records_failed: i32,
    rows_excluded: i32,
    average_confidence: Option<f64>,
    error_class: Option<String>,
    error_message: Option<String>,
    worker_id: Option<String>,
}

fn invalid(column: &str, e: String) -> AppError {
    AppError::DatabaseError(format!("Invalid {column} in extraction_jobs: {e}"))
}

impl TryFrom<JobRow> for ExtractionJob {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, AppError> {
        Ok(ExtractionJob {
            id: row.id,
            document_id: row.document_id,
            strategy: row.strategy.parse::<Strategy>().map_err(|e| invalid("strategy", e))?,
            status: row.status.parse::<JobStatus>().map_err(|e| invalid("status", e))?,
            profile_name: row.profile_name,
            content_hash: row.content_hash,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            records_extracted: row.records_extracted.max(0) as u32,
            records_failed: row.records_failed.max(0) as u32,
            rows_excluded: row.rows_excluded.max(0) as u32,
            average_confidence: row.average_confidence,
            error_class: row
                .error_class
                .map(|c| c.parse::<ErrorClass>().map_err(|e| invalid("error_class", e)))
                .transpose()?,
            error_message: row.error_message,
            worker_id: row.worker_id,
        })
    }
}

impl JobTracker for JobRepository {
    async fn save_job(&self, job: &ExtractionJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO extraction_jobs (
                id, document_id, strategy, status, profile_name, content_hash,
                created_at, started_at, completed_at, records_extracted,
                records_failed, rows_excluded, average_confidence, error_class,
                error_message, worker_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                profile_name = EXCLUDED.profile_name,
                content_hash = EXCLUDED.content_hash,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                records_extracted = EXCLUDED.records_extracted,
                records_failed = EXCLUDED.records_failed,
                rows_excluded = EXCLUDED.rows_excluded,
                average_confidence = EXCLUDED.average_confidence,
                error_class = EXCLUDED.error_class,
                error_message = EXCLUDED.error_message,
                worker_id = EXCLUDED.worker_id
            "#,
        )
        .bind(job.id)
        .bind(job.document_id)
        .bind(job.strategy.as_str())
        .bind(job.status.as_str())
        .bind(&job.profile_name)
        .bind(&job.content_hash)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.records_extracted as i32)
        .bind(job.records_failed as i32)
        .bind(job.rows_excluded as i32)
        .bind(job.average_confidence)
        .bind(job.error_class.map(|c| c.as_str()))
        .bind(&job.error_message)
        .bind(&job.worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn list_jobs(
        &self,
        document_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ExtractionJob>, AppError> {
        let rows = if let Some(document_id) = document_id {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM extraction_jobs
                WHERE document_id = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(document_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, JobRow>(
                r#"
                SELECT * FROM extraction_jobs
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(ExtractionJob::try_from).collect()
    }

    async fn fail_stale_jobs(&self, older_than: Duration) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'failed',
                error_class = 'TIMEOUT',
                error_message = 'Job left running past the stale ceiling',
                completed_at = NOW()
            WHERE status = 'running'
              AND started_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
