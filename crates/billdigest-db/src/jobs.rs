//! Embedding job repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use billdigest_core::{
    new_v7, DocumentId, EmbeddingJob, EmbeddingJobRepository, Error, JobProgress, JobStatus,
    Result,
};

const JOB_COLUMNS: &str = "job_id, congress, bill_type, bill_number, status, total_pages,
    pages_processed, chunks_embedded, map_summaries_done, reduce_done, error_message,
    started_at, completed_at";

/// PostgreSQL implementation of EmbeddingJobRepository.
pub struct PgEmbeddingJobRepository {
    pool: Pool<Postgres>,
}

impl PgEmbeddingJobRepository {
    /// Create a new PgEmbeddingJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into an EmbeddingJob.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<EmbeddingJob> {
        let status: String = row.get("status");
        Ok(EmbeddingJob {
            id: row.get("job_id"),
            document: DocumentId {
                congress: row.get("congress"),
                bill_type: row.get("bill_type"),
                bill_number: row.get("bill_number"),
            },
            status: status.parse::<JobStatus>()?,
            total_pages: row.get("total_pages"),
            pages_processed: row.get("pages_processed"),
            chunks_embedded: row.get("chunks_embedded"),
            map_summaries_done: row.get("map_summaries_done"),
            reduce_done: row.get("reduce_done"),
            error_message: row.get("error_message"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl EmbeddingJobRepository for PgEmbeddingJobRepository {
    async fn create(&self, doc: &DocumentId, total_pages: Option<i32>) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO bill_embedding_jobs
                (job_id, congress, bill_type, bill_number, status, total_pages, started_at)
             VALUES ($1, $2, $3, $4, 'pending', $5, $6)",
        )
        .bind(job_id)
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .bind(total_pages)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn get_or_reuse(
        &self,
        doc: &DocumentId,
        window: chrono::Duration,
    ) -> Result<Option<Uuid>> {
        let since = Utc::now() - window;
        let job_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT job_id FROM bill_embedding_jobs
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3
               AND status IN ('pending', 'processing')
               AND started_at > $4
             ORDER BY started_at DESC
             LIMIT 1",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(job_id)
    }

    async fn update_progress(&self, job_id: Uuid, progress: &JobProgress) -> Result<()> {
        // Mirrors EmbeddingJob::apply_progress: counters only move forward,
        // terminal rows are excluded by the WHERE clause.
        let result = sqlx::query(
            "UPDATE bill_embedding_jobs SET
                status = 'processing',
                total_pages = COALESCE($2, total_pages),
                pages_processed = GREATEST(pages_processed, COALESCE($3, pages_processed)),
                chunks_embedded = GREATEST(chunks_embedded, COALESCE($4, chunks_embedded)),
                map_summaries_done = GREATEST(map_summaries_done, COALESCE($5, map_summaries_done)),
                reduce_done = reduce_done OR COALESCE($6, FALSE)
             WHERE job_id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(job_id)
        .bind(progress.total_pages)
        .bind(progress.pages_processed)
        .bind(progress.chunks_embedded)
        .bind(progress.map_summaries_done)
        .bind(progress.reduce_done)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            debug!(
                subsystem = "jobs",
                component = "tracker",
                op = "update_progress",
                job_id = %job_id,
                "Progress ignored for missing or terminal job"
            );
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, success: bool, error: Option<&str>) -> Result<()> {
        let status = if success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        let error_message = if success { None } else { error };

        let result = sqlx::query(
            "UPDATE bill_embedding_jobs
             SET status = $2, completed_at = $3, error_message = $4
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<EmbeddingJob>> {
        let query = format!(
            "SELECT {} FROM bill_embedding_jobs WHERE job_id = $1",
            JOB_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }
}
