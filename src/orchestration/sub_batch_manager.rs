//! # Sub-Batch Manager
//!
//! Splits a batch job's record set into fixed-size chunks, persists one row
//! per chunk, and executes chunks under a bounded per-service concurrency
//! limit. Chunk-level progress, resume-from-failure, and cooperative
//! cancellation all live here.
//!
//! Failure containment follows the error taxonomy: a terminal per-record
//! failure only bumps the chunk's failed counter, while a transient service
//! failure that survives its in-chunk retry budget aborts the chunk as
//! `failed` with `last_error` set, leaving it for explicit resume.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BatchingConfig;
use crate::error::{EnrichmentError, Result};
use crate::logging::log_job_operation;
use crate::models::{BatchJob, PayeeRecord, SubBatch};
use crate::state_machine::{BatchJobStatus, SubBatchStatus};
use crate::store::{require_job, require_sub_batch, EnrichmentStore, RecordStore};

/// Outcome of processing a single record within a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The enrichment result was applied synchronously.
    Applied,
    /// An asynchronous search was registered; the search worker will account
    /// for this record when the search reaches a terminal state.
    Deferred,
}

/// Ownership context handed to a processor alongside each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkContext {
    pub batch_job_id: Uuid,
    pub sub_batch_id: Uuid,
}

/// Per-record work a stage hands to the manager for chunk execution.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process(&self, record: &PayeeRecord, ctx: ChunkContext) -> Result<RecordOutcome>;
}

/// Outcome of a cancel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub cancelled_sub_batches: usize,
}

/// SubBatchManager owns batch-job decomposition and chunk execution.
pub struct SubBatchManager {
    store: Arc<dyn EnrichmentStore>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: BatchingConfig,
    /// One counting semaphore per service, never a global one: each external
    /// service enforces its own concurrent-request ceiling.
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl SubBatchManager {
    pub fn new(
        store: Arc<dyn EnrichmentStore>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: BatchingConfig,
    ) -> Self {
        Self {
            store,
            records,
            clock,
            config,
            semaphores: DashMap::new(),
        }
    }

    fn semaphore_for(&self, service: &str) -> Arc<Semaphore> {
        self.semaphores
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_chunks)))
            .clone()
    }

    /// Split `record_ids` into fixed-size chunks and persist one BatchJob
    /// plus one SubBatch per chunk. Chunk boundaries come from the ordered
    /// id snapshot, so they are deterministic across resume.
    pub async fn submit_for_enrichment(
        &self,
        batch_id: Uuid,
        service: &str,
        record_ids: Vec<Uuid>,
    ) -> Result<BatchJob> {
        if record_ids.is_empty() {
            return Err(EnrichmentError::Validation(format!(
                "cannot submit empty record set for service `{service}`"
            )));
        }

        let now = self.clock.now();
        let job = BatchJob::new(batch_id, service, record_ids, now);
        let chunk_size = self.config.chunk_size as i32;
        let total = job.total_records;
        let total_batches = (total + chunk_size - 1) / chunk_size;

        let subs: Vec<SubBatch> = (0..total_batches)
            .map(|n| {
                let start = n * chunk_size;
                let end = (start + chunk_size).min(total);
                SubBatch::new(job.id, n + 1, total_batches, start, end, now)
            })
            .collect();

        let job = self.store.create_job(job).await?;
        self.store.create_sub_batches(&subs).await?;

        log_job_operation(
            "submit_for_enrichment",
            job.id,
            Some(service),
            &job.status.to_string(),
            Some(&format!(
                "{} records split into {} sub-batches",
                total, total_batches
            )),
        );
        Ok(job)
    }

    /// Execute every pending sub-batch of the job through `processor`, at
    /// most `max_concurrent_chunks` chunks in flight at once.
    pub async fn execute_job(
        &self,
        batch_job_id: Uuid,
        processor: Arc<dyn RecordProcessor>,
    ) -> Result<BatchJob> {
        let mut job = require_job(self.store.as_ref(), batch_job_id).await?;
        if job.status == BatchJobStatus::Pending {
            job.status = BatchJobStatus::Processing;
            job.started_at = Some(self.clock.now());
            self.store.update_job(&job).await?;
        }

        let pending: Vec<SubBatch> = self
            .store
            .sub_batches_for_job(batch_job_id)
            .await?
            .into_iter()
            .filter(|sub| sub.status == SubBatchStatus::Pending)
            .collect();

        let semaphore = self.semaphore_for(&job.service);
        let mut handles = Vec::with_capacity(pending.len());
        for sub in pending {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let records = self.records.clone();
            let clock = self.clock.clone();
            let processor = processor.clone();
            let job = job.clone();
            let retries = self.config.transient_retry_attempts;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| EnrichmentError::Store(e.to_string()))?;
                execute_chunk(store, records, clock, &job, sub, processor, retries).await
            }));
        }

        let joined = futures::future::try_join_all(handles)
            .await
            .map_err(|e| EnrichmentError::Store(format!("chunk task panicked: {e}")))?;
        for result in joined {
            result?;
        }

        recompute_job_status(self.store.as_ref(), self.clock.as_ref(), batch_job_id).await
    }

    /// Re-enqueue every failed sub-batch of the job: reset to `pending` and
    /// increment its retry count. Returns how many were resumed; zero failed
    /// sub-batches is a no-op, a missing job is `NotFound`.
    pub async fn resume(&self, batch_job_id: Uuid) -> Result<usize> {
        require_job(self.store.as_ref(), batch_job_id).await?;

        let mut resumed = 0;
        for mut sub in self.store.sub_batches_for_job(batch_job_id).await? {
            if sub.status != SubBatchStatus::Failed {
                continue;
            }
            sub.status = SubBatchStatus::Pending;
            sub.retry_count += 1;
            sub.completed_at = None;
            self.store.update_sub_batch(&sub).await?;
            resumed += 1;
        }

        if resumed > 0 {
            recompute_job_status(self.store.as_ref(), self.clock.as_ref(), batch_job_id).await?;
            log_job_operation(
                "resume",
                batch_job_id,
                None,
                "pending",
                Some(&format!("{resumed} sub-batches re-enqueued")),
            );
        }
        Ok(resumed)
    }

    /// Cancel the job: every non-terminal sub-batch moves to the terminal
    /// `cancelled` state and the job itself is marked cancelled. Completed
    /// sub-batches stay untouched. Cancelling an already-terminal job is an
    /// idempotent no-op.
    pub async fn cancel(&self, batch_job_id: Uuid) -> Result<CancelOutcome> {
        let mut job = require_job(self.store.as_ref(), batch_job_id).await?;
        if job.status.is_terminal() {
            return Ok(CancelOutcome {
                success: true,
                cancelled_sub_batches: 0,
            });
        }

        let now = self.clock.now();
        let mut cancelled = 0;
        for mut sub in self.store.sub_batches_for_job(batch_job_id).await? {
            if sub.status.is_terminal() {
                continue;
            }
            sub.status = SubBatchStatus::Cancelled;
            sub.last_error = Some("cancelled by user".to_string());
            sub.completed_at = Some(now);
            self.store.update_sub_batch(&sub).await?;
            cancelled += 1;
        }

        // The job row is the cancellation flag in-flight chunk executors
        // observe at each record boundary.
        job.status = BatchJobStatus::Cancelled;
        job.completed_at = Some(now);
        self.store.update_job(&job).await?;

        log_job_operation(
            "cancel",
            batch_job_id,
            Some(&job.service),
            "cancelled",
            Some(&format!("{cancelled} sub-batches cancelled")),
        );
        Ok(CancelOutcome {
            success: true,
            cancelled_sub_batches: cancelled,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_chunk(
    store: Arc<dyn EnrichmentStore>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    job: &BatchJob,
    mut sub: SubBatch,
    processor: Arc<dyn RecordProcessor>,
    transient_retries: u32,
) -> Result<()> {
    sub.status = SubBatchStatus::Processing;
    sub.started_at = Some(clock.now());
    sub.records_processed = 0;
    sub.records_failed = 0;
    sub.last_error = None;
    store.update_sub_batch(&sub).await?;

    // Once deferred searches exist, the search worker writes this row too:
    // it accounts each terminal search outcome as it lands. Every mutation
    // below re-reads the row first so a stale local copy can never clobber
    // the worker's increments.
    let sub_id = sub.id;
    let (start, end) = (sub.start_index, sub.end_index);

    let mut deferred = 0;
    for index in start..end {
        // Cooperative cancellation, checked at every record boundary.
        let current = require_job(store.as_ref(), job.id).await?;
        if current.status == BatchJobStatus::Cancelled {
            let mut sub = require_sub_batch(store.as_ref(), sub_id).await?;
            sub.status = SubBatchStatus::Cancelled;
            sub.last_error = Some("cancelled by user".to_string());
            sub.completed_at = Some(clock.now());
            store.update_sub_batch(&sub).await?;
            return Ok(());
        }

        let record_id = job.record_ids[index as usize];
        let Some(record) = records.record(record_id).await? else {
            let mut sub = require_sub_batch(store.as_ref(), sub_id).await?;
            sub.records_failed += 1;
            sub.last_error = Some(format!("record {record_id} missing from record store"));
            store.update_sub_batch(&sub).await?;
            continue;
        };

        let ctx = ChunkContext {
            batch_job_id: job.id,
            sub_batch_id: sub_id,
        };
        let outcome = crate::stages::with_transient_retry(transient_retries, || {
            processor.process(&record, ctx)
        })
        .await;

        match outcome {
            Ok(RecordOutcome::Applied) => {
                let mut sub = require_sub_batch(store.as_ref(), sub_id).await?;
                sub.records_processed += 1;
                store.update_sub_batch(&sub).await?;
            }
            Ok(RecordOutcome::Deferred) => {
                deferred += 1;
            }
            Err(err) if err.is_transient() => {
                // Whole-service trouble; abort the chunk and leave it for
                // explicit resume.
                let mut sub = require_sub_batch(store.as_ref(), sub_id).await?;
                sub.status = SubBatchStatus::Failed;
                sub.last_error = Some(err.to_string());
                sub.completed_at = Some(clock.now());
                store.update_sub_batch(&sub).await?;
                return Ok(());
            }
            Err(err) => {
                // Contained per-record failure.
                let mut sub = require_sub_batch(store.as_ref(), sub_id).await?;
                sub.records_failed += 1;
                sub.last_error = Some(err.to_string());
                store.update_sub_batch(&sub).await?;
                let mut record = record;
                record.enrichment_error = Some(err.to_string());
                records.update_record(&record).await?;
            }
        }
    }

    let mut sub = require_sub_batch(store.as_ref(), sub_id).await?;
    if sub.status == SubBatchStatus::Processing
        && (deferred == 0 || sub.is_fully_accounted())
    {
        // Either nothing was deferred, or every deferred search already
        // reached a terminal state while the chunk was still executing and
        // the worker's accounting could not yet close the row out.
        sub.status = SubBatchStatus::Completed;
        sub.completed_at = Some(clock.now());
        store.update_sub_batch(&sub).await?;
    }
    // Otherwise the chunk stays `processing`; the search worker finalizes it
    // as the outstanding searches reach terminal states.
    Ok(())
}

/// Recompute a job's aggregate counts and status from its sub-batches.
/// Called every time a sub-batch reaches a terminal state.
pub(crate) async fn recompute_job_status(
    store: &dyn EnrichmentStore,
    clock: &dyn Clock,
    batch_job_id: Uuid,
) -> Result<BatchJob> {
    let mut job = require_job(store, batch_job_id).await?;
    let subs = store.sub_batches_for_job(batch_job_id).await?;

    job.processed_records = subs.iter().map(|s| s.records_processed).sum();
    job.failed_records = subs.iter().map(|s| s.records_failed).sum();

    // Cancellation is sticky; derive() never un-cancels a job.
    if job.status != BatchJobStatus::Cancelled {
        let statuses: Vec<SubBatchStatus> = subs.iter().map(|s| s.status).collect();
        job.status = BatchJobStatus::derive(&statuses);
    }

    if job.status.is_terminal() {
        if job.completed_at.is_none() {
            job.completed_at = Some(clock.now());
        }
    } else {
        job.completed_at = None;
    }

    store.update_job(&job).await?;
    Ok(job)
}
