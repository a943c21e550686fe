//! PostgreSQL store backend.
//!
//! Runtime-checked SQLx queries against the `enrichment_*` tables. Statuses
//! are stored as text and parsed back through each enum's `FromStr`, so the
//! schema stays portable and the row structs stay plain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{EnrichmentError, Result};
use crate::models::{Batch, BatchJob, BatchStage, SearchRequest, SubBatch};
use crate::stages::StageKind;
use crate::store::EnrichmentStore;

/// SQLx-backed implementation of [`EnrichmentStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    label: String,
    status: String,
    total_records: i32,
    processed_records: i32,
    failed_records: i32,
    current_step: Option<String>,
    progress_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BatchRow {
    fn into_batch(self) -> Result<Batch> {
        Ok(Batch {
            id: self.id,
            label: self.label,
            status: self.status.parse().map_err(EnrichmentError::Store)?,
            total_records: self.total_records,
            processed_records: self.processed_records,
            failed_records: self.failed_records,
            current_step: self.current_step,
            progress_message: self.progress_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchStageRow {
    batch_id: Uuid,
    stage: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    message: Option<String>,
}

impl BatchStageRow {
    fn into_stage(self) -> Result<BatchStage> {
        Ok(BatchStage {
            batch_id: self.batch_id,
            stage: self.stage.parse().map_err(EnrichmentError::Store)?,
            status: self.status.parse().map_err(EnrichmentError::Store)?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            message: self.message,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchJobRow {
    id: Uuid,
    batch_id: Uuid,
    service: String,
    status: String,
    total_records: i32,
    processed_records: i32,
    failed_records: i32,
    record_ids: serde_json::Value,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl BatchJobRow {
    fn into_job(self) -> Result<BatchJob> {
        Ok(BatchJob {
            id: self.id,
            batch_id: self.batch_id,
            service: self.service,
            status: self.status.parse().map_err(EnrichmentError::Store)?,
            total_records: self.total_records,
            processed_records: self.processed_records,
            failed_records: self.failed_records,
            record_ids: serde_json::from_value(self.record_ids)
                .map_err(|e| EnrichmentError::Store(e.to_string()))?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubBatchRow {
    id: Uuid,
    batch_job_id: Uuid,
    batch_number: i32,
    total_batches: i32,
    start_index: i32,
    end_index: i32,
    record_count: i32,
    status: String,
    records_processed: i32,
    records_failed: i32,
    retry_count: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl SubBatchRow {
    fn into_sub_batch(self) -> Result<SubBatch> {
        Ok(SubBatch {
            id: self.id,
            batch_job_id: self.batch_job_id,
            batch_number: self.batch_number,
            total_batches: self.total_batches,
            start_index: self.start_index,
            end_index: self.end_index,
            record_count: self.record_count,
            status: self.status.parse().map_err(EnrichmentError::Store)?,
            records_processed: self.records_processed,
            records_failed: self.records_failed,
            retry_count: self.retry_count,
            last_error: self.last_error,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SearchRequestRow {
    id: Uuid,
    batch_id: Uuid,
    record_id: Uuid,
    sub_batch_id: Option<Uuid>,
    search_type: String,
    status: String,
    external_search_id: Option<String>,
    request_payload: serde_json::Value,
    response_payload: Option<serde_json::Value>,
    poll_attempts: i32,
    max_poll_attempts: i32,
    submitted_at: Option<DateTime<Utc>>,
    last_polled_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl SearchRequestRow {
    fn into_search(self) -> Result<SearchRequest> {
        Ok(SearchRequest {
            id: self.id,
            batch_id: self.batch_id,
            record_id: self.record_id,
            sub_batch_id: self.sub_batch_id,
            search_type: self.search_type,
            status: self.status.parse().map_err(EnrichmentError::Store)?,
            external_search_id: self.external_search_id,
            request_payload: self.request_payload,
            response_payload: self.response_payload,
            poll_attempts: self.poll_attempts,
            max_poll_attempts: self.max_poll_attempts,
            submitted_at: self.submitted_at,
            last_polled_at: self.last_polled_at,
            completed_at: self.completed_at,
            error: self.error,
            created_at: self.created_at,
        })
    }
}

const BATCH_COLUMNS: &str = "id, label, status, total_records, processed_records, failed_records, \
                             current_step, progress_message, created_at, updated_at";
const STAGE_COLUMNS: &str = "batch_id, stage, status, started_at, completed_at, message";
const JOB_COLUMNS: &str = "id, batch_id, service, status, total_records, processed_records, \
                           failed_records, record_ids, created_at, started_at, completed_at";
const SUB_BATCH_COLUMNS: &str =
    "id, batch_job_id, batch_number, total_batches, start_index, end_index, record_count, status, \
     records_processed, records_failed, retry_count, last_error, created_at, started_at, \
     completed_at";
const SEARCH_COLUMNS: &str =
    "id, batch_id, record_id, sub_batch_id, search_type, status, external_search_id, \
     request_payload, response_payload, poll_attempts, max_poll_attempts, submitted_at, \
     last_polled_at, completed_at, error, created_at";

#[async_trait]
impl EnrichmentStore for PgStore {
    async fn create_batch(&self, batch: Batch) -> Result<Batch> {
        sqlx::query(
            "INSERT INTO enrichment_batches \
             (id, label, status, total_records, processed_records, failed_records, current_step, \
              progress_message, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(batch.id)
        .bind(&batch.label)
        .bind(batch.status.to_string())
        .bind(batch.total_records)
        .bind(batch.processed_records)
        .bind(batch.failed_records)
        .bind(&batch.current_step)
        .bind(&batch.progress_message)
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(batch)
    }

    async fn batch(&self, id: Uuid) -> Result<Option<Batch>> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM enrichment_batches WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BatchRow::into_batch).transpose()
    }

    async fn update_batch(&self, batch: &Batch) -> Result<()> {
        sqlx::query(
            "UPDATE enrichment_batches SET label = $2, status = $3, total_records = $4, \
             processed_records = $5, failed_records = $6, current_step = $7, \
             progress_message = $8, updated_at = $9 WHERE id = $1",
        )
        .bind(batch.id)
        .bind(&batch.label)
        .bind(batch.status.to_string())
        .bind(batch.total_records)
        .bind(batch.processed_records)
        .bind(batch.failed_records)
        .bind(&batch.current_step)
        .bind(&batch.progress_message)
        .bind(batch.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stage(&self, batch_id: Uuid, kind: StageKind) -> Result<Option<BatchStage>> {
        let row = sqlx::query_as::<_, BatchStageRow>(&format!(
            "SELECT {STAGE_COLUMNS} FROM enrichment_batch_stages WHERE batch_id = $1 AND stage = $2"
        ))
        .bind(batch_id)
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(BatchStageRow::into_stage).transpose()
    }

    async fn stages_for_batch(&self, batch_id: Uuid) -> Result<Vec<BatchStage>> {
        let rows = sqlx::query_as::<_, BatchStageRow>(&format!(
            "SELECT {STAGE_COLUMNS} FROM enrichment_batch_stages WHERE batch_id = $1"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        let mut stages = rows
            .into_iter()
            .map(BatchStageRow::into_stage)
            .collect::<Result<Vec<_>>>()?;
        stages.sort_by_key(|s| s.stage.order());
        Ok(stages)
    }

    async fn upsert_stage(&self, stage: &BatchStage) -> Result<()> {
        sqlx::query(
            "INSERT INTO enrichment_batch_stages \
             (batch_id, stage, status, started_at, completed_at, message) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (batch_id, stage) DO UPDATE SET status = EXCLUDED.status, \
             started_at = EXCLUDED.started_at, completed_at = EXCLUDED.completed_at, \
             message = EXCLUDED.message",
        )
        .bind(stage.batch_id)
        .bind(stage.stage.to_string())
        .bind(stage.status.to_string())
        .bind(stage.started_at)
        .bind(stage.completed_at)
        .bind(&stage.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_job(&self, job: BatchJob) -> Result<BatchJob> {
        sqlx::query(
            "INSERT INTO enrichment_batch_jobs \
             (id, batch_id, service, status, total_records, processed_records, failed_records, \
              record_ids, created_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.id)
        .bind(job.batch_id)
        .bind(&job.service)
        .bind(job.status.to_string())
        .bind(job.total_records)
        .bind(job.processed_records)
        .bind(job.failed_records)
        .bind(serde_json::to_value(&job.record_ids).map_err(|e| {
            EnrichmentError::Store(e.to_string())
        })?)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn job(&self, id: Uuid) -> Result<Option<BatchJob>> {
        let row = sqlx::query_as::<_, BatchJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_batch_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BatchJobRow::into_job).transpose()
    }

    async fn jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<BatchJob>> {
        let rows = sqlx::query_as::<_, BatchJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_batch_jobs WHERE batch_id = $1 \
             ORDER BY created_at ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BatchJobRow::into_job).collect()
    }

    async fn update_job(&self, job: &BatchJob) -> Result<()> {
        sqlx::query(
            "UPDATE enrichment_batch_jobs SET status = $2, total_records = $3, \
             processed_records = $4, failed_records = $5, started_at = $6, completed_at = $7 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(job.total_records)
        .bind(job.processed_records)
        .bind(job.failed_records)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_sub_batches(&self, subs: &[SubBatch]) -> Result<()> {
        for sub in subs {
            sqlx::query(
                "INSERT INTO enrichment_sub_batches \
                 (id, batch_job_id, batch_number, total_batches, start_index, end_index, \
                  record_count, status, records_processed, records_failed, retry_count, \
                  last_error, created_at, started_at, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(sub.id)
            .bind(sub.batch_job_id)
            .bind(sub.batch_number)
            .bind(sub.total_batches)
            .bind(sub.start_index)
            .bind(sub.end_index)
            .bind(sub.record_count)
            .bind(sub.status.to_string())
            .bind(sub.records_processed)
            .bind(sub.records_failed)
            .bind(sub.retry_count)
            .bind(&sub.last_error)
            .bind(sub.created_at)
            .bind(sub.started_at)
            .bind(sub.completed_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn sub_batch(&self, id: Uuid) -> Result<Option<SubBatch>> {
        let row = sqlx::query_as::<_, SubBatchRow>(&format!(
            "SELECT {SUB_BATCH_COLUMNS} FROM enrichment_sub_batches WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SubBatchRow::into_sub_batch).transpose()
    }

    async fn sub_batches_for_job(&self, batch_job_id: Uuid) -> Result<Vec<SubBatch>> {
        let rows = sqlx::query_as::<_, SubBatchRow>(&format!(
            "SELECT {SUB_BATCH_COLUMNS} FROM enrichment_sub_batches WHERE batch_job_id = $1 \
             ORDER BY batch_number ASC"
        ))
        .bind(batch_job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubBatchRow::into_sub_batch).collect()
    }

    async fn update_sub_batch(&self, sub: &SubBatch) -> Result<()> {
        sqlx::query(
            "UPDATE enrichment_sub_batches SET status = $2, records_processed = $3, \
             records_failed = $4, retry_count = $5, last_error = $6, started_at = $7, \
             completed_at = $8 WHERE id = $1",
        )
        .bind(sub.id)
        .bind(sub.status.to_string())
        .bind(sub.records_processed)
        .bind(sub.records_failed)
        .bind(sub.retry_count)
        .bind(&sub.last_error)
        .bind(sub.started_at)
        .bind(sub.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_search(&self, search: SearchRequest) -> Result<SearchRequest> {
        sqlx::query(
            "INSERT INTO enrichment_search_requests \
             (id, batch_id, record_id, sub_batch_id, search_type, status, external_search_id, \
              request_payload, response_payload, poll_attempts, max_poll_attempts, submitted_at, \
              last_polled_at, completed_at, error, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(search.id)
        .bind(search.batch_id)
        .bind(search.record_id)
        .bind(search.sub_batch_id)
        .bind(&search.search_type)
        .bind(search.status.to_string())
        .bind(&search.external_search_id)
        .bind(&search.request_payload)
        .bind(&search.response_payload)
        .bind(search.poll_attempts)
        .bind(search.max_poll_attempts)
        .bind(search.submitted_at)
        .bind(search.last_polled_at)
        .bind(search.completed_at)
        .bind(&search.error)
        .bind(search.created_at)
        .execute(&self.pool)
        .await?;
        Ok(search)
    }

    async fn search(&self, id: Uuid) -> Result<Option<SearchRequest>> {
        let row = sqlx::query_as::<_, SearchRequestRow>(&format!(
            "SELECT {SEARCH_COLUMNS} FROM enrichment_search_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SearchRequestRow::into_search).transpose()
    }

    async fn search_by_external_id(
        &self,
        external_search_id: &str,
    ) -> Result<Option<SearchRequest>> {
        let row = sqlx::query_as::<_, SearchRequestRow>(&format!(
            "SELECT {SEARCH_COLUMNS} FROM enrichment_search_requests \
             WHERE external_search_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(external_search_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SearchRequestRow::into_search).transpose()
    }

    async fn searches_for_batch(&self, batch_id: Uuid) -> Result<Vec<SearchRequest>> {
        let rows = sqlx::query_as::<_, SearchRequestRow>(&format!(
            "SELECT {SEARCH_COLUMNS} FROM enrichment_search_requests WHERE batch_id = $1 \
             ORDER BY created_at ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SearchRequestRow::into_search).collect()
    }

    async fn update_search(&self, search: &SearchRequest) -> Result<()> {
        sqlx::query(
            "UPDATE enrichment_search_requests SET status = $2, external_search_id = $3, \
             response_payload = $4, poll_attempts = $5, submitted_at = $6, last_polled_at = $7, \
             completed_at = $8, error = $9 WHERE id = $1",
        )
        .bind(search.id)
        .bind(search.status.to_string())
        .bind(&search.external_search_id)
        .bind(&search.response_payload)
        .bind(search.poll_attempts)
        .bind(search.submitted_at)
        .bind(search.last_polled_at)
        .bind(search.completed_at)
        .bind(&search.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_searches(&self, polled_before: DateTime<Utc>) -> Result<Vec<SearchRequest>> {
        let rows = sqlx::query_as::<_, SearchRequestRow>(&format!(
            "SELECT {SEARCH_COLUMNS} FROM enrichment_search_requests \
             WHERE status IN ('submitted', 'polling') \
             AND (last_polled_at IS NULL OR last_polled_at < $1) \
             ORDER BY created_at ASC"
        ))
        .bind(polled_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SearchRequestRow::into_search).collect()
    }
}
