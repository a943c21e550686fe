//! # Durable Store
//!
//! All coordination between the orchestrator, the sub-batch executors, and
//! the search worker goes through these rows; no engine component shares
//! in-memory state with another. Updates are single-row read-then-write:
//! every writer re-reads the row immediately before mutating it, so no
//! cross-row transaction is required. A sub-batch row with deferred searches
//! outstanding has two writers (the chunk executor and the search worker),
//! which is why stale in-memory copies must never be written back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{EnrichmentError, Result};
use crate::models::{Batch, BatchJob, BatchStage, PayeeRecord, SearchRequest, SubBatch};
use crate::stages::StageKind;

pub use memory::{MemoryRecordStore, MemoryStore};
pub use postgres::PgStore;

/// Persistence seam for every engine-owned entity.
#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    // Batches
    async fn create_batch(&self, batch: Batch) -> Result<Batch>;
    async fn batch(&self, id: Uuid) -> Result<Option<Batch>>;
    async fn update_batch(&self, batch: &Batch) -> Result<()>;

    // Per-stage progress rows
    async fn stage(&self, batch_id: Uuid, kind: StageKind) -> Result<Option<BatchStage>>;
    async fn stages_for_batch(&self, batch_id: Uuid) -> Result<Vec<BatchStage>>;
    async fn upsert_stage(&self, stage: &BatchStage) -> Result<()>;

    // Batch jobs
    async fn create_job(&self, job: BatchJob) -> Result<BatchJob>;
    async fn job(&self, id: Uuid) -> Result<Option<BatchJob>>;
    async fn jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<BatchJob>>;
    async fn update_job(&self, job: &BatchJob) -> Result<()>;

    // Sub-batches
    async fn create_sub_batches(&self, subs: &[SubBatch]) -> Result<()>;
    async fn sub_batch(&self, id: Uuid) -> Result<Option<SubBatch>>;
    async fn sub_batches_for_job(&self, batch_job_id: Uuid) -> Result<Vec<SubBatch>>;
    async fn update_sub_batch(&self, sub: &SubBatch) -> Result<()>;

    // Search requests
    async fn create_search(&self, search: SearchRequest) -> Result<SearchRequest>;
    async fn search(&self, id: Uuid) -> Result<Option<SearchRequest>>;
    async fn search_by_external_id(&self, external_search_id: &str)
        -> Result<Option<SearchRequest>>;
    async fn searches_for_batch(&self, batch_id: Uuid) -> Result<Vec<SearchRequest>>;
    async fn update_search(&self, search: &SearchRequest) -> Result<()>;
    /// Searches in `submitted`/`polling` whose `last_polled_at` is null or
    /// older than the given cutoff; the worker's per-tick selection.
    async fn due_searches(&self, polled_before: DateTime<Utc>) -> Result<Vec<SearchRequest>>;
}

/// Collaborator contract for the payee record store. The engine reads
/// eligibility and writes enrichment results; the schema behind it is the
/// collaborator's concern.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn records_for_batch(&self, batch_id: Uuid) -> Result<Vec<PayeeRecord>>;
    async fn record(&self, id: Uuid) -> Result<Option<PayeeRecord>>;
    async fn update_record(&self, record: &PayeeRecord) -> Result<()>;

    /// Records of the batch matching a stage's eligibility predicate,
    /// preserving batch order for deterministic chunk boundaries.
    async fn eligible_for_stage(
        &self,
        batch_id: Uuid,
        predicate: &(dyn for<'a> Fn(&'a PayeeRecord) -> bool + Sync),
    ) -> Result<Vec<PayeeRecord>> {
        Ok(self
            .records_for_batch(batch_id)
            .await?
            .into_iter()
            .filter(|record| predicate(record))
            .collect())
    }
}

/// Fetch a batch or fail with `NotFound`.
pub async fn require_batch(store: &dyn EnrichmentStore, id: Uuid) -> Result<Batch> {
    store
        .batch(id)
        .await?
        .ok_or_else(|| EnrichmentError::NotFound(format!("batch {id}")))
}

/// Fetch a batch job or fail with `NotFound`.
pub async fn require_job(store: &dyn EnrichmentStore, id: Uuid) -> Result<BatchJob> {
    store
        .job(id)
        .await?
        .ok_or_else(|| EnrichmentError::NotFound(format!("batch job {id}")))
}

/// Fetch a sub-batch or fail with `NotFound`.
pub async fn require_sub_batch(store: &dyn EnrichmentStore, id: Uuid) -> Result<SubBatch> {
    store
        .sub_batch(id)
        .await?
        .ok_or_else(|| EnrichmentError::NotFound(format!("sub-batch {id}")))
}

/// Fetch a search request or fail with `NotFound`.
pub async fn require_search(store: &dyn EnrichmentStore, id: Uuid) -> Result<SearchRequest> {
    store
        .search(id)
        .await?
        .ok_or_else(|| EnrichmentError::NotFound(format!("search request {id}")))
}
