//! Chunk repository implementation.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use billdigest_core::{
    defaults, BucketSpan, ChunkRepository, DocumentChunk, DocumentId, EmbeddedChunk, Error,
    Result, RetrievedChunk,
};

/// PostgreSQL implementation of ChunkRepository.
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    /// Create a new PgChunkRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn count(&self, doc: &DocumentId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bill_chunks
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn upsert_batch(&self, doc: &DocumentId, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for embedded in chunks {
            let chunk = &embedded.chunk;
            sqlx::query(
                "INSERT INTO bill_chunks
                    (congress, bill_type, bill_number, chunk_index, text,
                     page_start, page_end, bucket_id, embedding)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (congress, bill_type, bill_number, chunk_index) DO UPDATE SET
                    text = EXCLUDED.text,
                    page_start = EXCLUDED.page_start,
                    page_end = EXCLUDED.page_end,
                    bucket_id = EXCLUDED.bucket_id,
                    embedding = EXCLUDED.embedding",
            )
            .bind(doc.congress)
            .bind(&doc.bill_type)
            .bind(&doc.bill_number)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.page_start)
            .bind(chunk.page_end)
            .bind(chunk.bucket_id)
            .bind(&embedded.embedding)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        debug!(
            subsystem = "database",
            component = "chunks",
            op = "upsert_batch",
            document = %doc,
            batch_size = chunks.len(),
            "Chunk batch persisted"
        );
        Ok(())
    }

    async fn delete_for_document(&self, doc: &DocumentId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM bill_chunks
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn list_buckets(&self, doc: &DocumentId) -> Result<Vec<BucketSpan>> {
        let rows = sqlx::query(
            "SELECT bucket_id, MIN(page_start) AS page_start, MAX(page_end) AS page_end,
                    COUNT(*) AS chunk_count
             FROM bill_chunks
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3
             GROUP BY bucket_id
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
            .map(|row| BucketSpan {
                bucket_id: row.get("bucket_id"),
                page_start: row.get("page_start"),
                page_end: row.get("page_end"),
                chunk_count: row.get("chunk_count"),
            })
            .collect())
    }

    async fn bucket_texts(&self, doc: &DocumentId, bucket_id: i32) -> Result<Vec<String>> {
        let texts: Vec<String> = sqlx::query_scalar(
            "SELECT text FROM bill_chunks
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3 AND bucket_id = $4
             ORDER BY chunk_index",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .bind(bucket_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(texts)
    }

    async fn nearest(
        &self,
        doc: &DocumentId,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<RetrievedChunk>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // The document filter runs after the HNSW scan; widen the candidate
        // list for this transaction only.
        let ef_search = limit.max(defaults::HNSW_EF_SEARCH);
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", ef_search))
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let rows = sqlx::query(
            "SELECT chunk_index, text, page_start, page_end, bucket_id,
                    (embedding <=> $4::vector)::float8 AS distance
             FROM bill_chunks
             WHERE congress = $1 AND bill_type = $2 AND bill_number = $3
             ORDER BY embedding <=> $4::vector
             LIMIT $5",
        )
        .bind(doc.congress)
        .bind(&doc.bill_type)
        .bind(&doc.bill_number)
        .bind(query)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| RetrievedChunk {
                chunk: DocumentChunk {
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    page_start: row.get("page_start"),
                    page_end: row.get("page_end"),
                    bucket_id: row.get("bucket_id"),
                },
                distance: row.get("distance"),
            })
            .collect())
    }
}
