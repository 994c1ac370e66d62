//! Bucket and final summary repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use billdigest_core::{
    BucketSummary, DocumentId, Error, FinalSummary, Result, StoredSummary, SummaryRepository,
};

/// PostgreSQL implementation of SummaryRepository.
pub struct PgSummaryRepository {
    pool: Pool<Postgres>,
}

impl PgSummaryRepository {
    /// Create a new PgSummaryRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SummaryRepository for PgSummaryRepository {
    async fn upsert_bucket_summary(&self, summary: &BucketSummary) -> Result<()> {
        let doc = &summary.document;
        sqlx::query(
            "INSERT INTO bill_chunk_summaries
                (congress, bill_type, bill_number, bucket_id, page_start, page_end,
                 summary_text, key_provisions, financial_impact, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
             ON CONFLICT (congress, bill_type, bill_number, bucket_id) DO UPDATE SET
                page_start = EXCLUDED.page_start,
                page_end = EXCLUDED.page_end,
                summary_text = EXCLUDED.summary_text,
                key_provisions = EXCLUDED.key_provisions,
                financial_impact = EXCLUDED.financial_impact,
                updated_at = now()",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .bind(summary.bucket_id)
        .bind(summary.page_start)
        .bind(summary.page_end)
        .bind(&summary.summary_text)
        .bind(&summary.key_provisions)
        .bind(&summary.financial_impact)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn prune_bucket_summaries(&self, doc: &DocumentId, keep: &[i32]) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM bill_chunk_summaries
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3
               AND NOT (bucket_id = ANY($4))",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn list_bucket_summaries(&self, doc: &DocumentId) -> Result<Vec<BucketSummary>> {
        let rows = sqlx::query(
            "SELECT bucket_id, page_start, page_end, summary_text, key_provisions, financial_impact
             FROM bill_chunk_summaries
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3
             ORDER BY bucket_id",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| BucketSummary {
                document: doc.clone(),
                bucket_id: row.get("bucket_id"),
                page_start: row.get("page_start"),
                page_end: row.get("page_end"),
                summary_text: row.get("summary_text"),
                key_provisions: row.get("key_provisions"),
                financial_impact: row.get("financial_impact"),
            })
            .collect())
    }

    async fn upsert_final_summary(&self, doc: &DocumentId, summary: &FinalSummary) -> Result<()> {
        let payload = serde_json::to_value(summary)?;
        sqlx::query(
            "INSERT INTO bill_summaries (congress, bill_type, bill_number, summary, created_at, updated_at)
             VALUES ($1, $2, $3, $4, now(), now())
             ON CONFLICT (congress, bill_type, bill_number) DO UPDATE SET
                summary = EXCLUDED.summary,
                updated_at = now()",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get_final_summary(&self, doc: &DocumentId) -> Result<Option<StoredSummary>> {
        let row = sqlx::query(
            "SELECT summary, created_at, updated_at FROM bill_summaries
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row.get("summary");
                Ok(Some(StoredSummary {
                    document: doc.clone(),
                    summary: serde_json::from_value(payload)?,
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                }))
            }
            None => Ok(None),
        }
    }
}
