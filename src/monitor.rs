//! # Monitoring Interface
//!
//! Read-mostly views plus the corrective actions (resume, cancel, retry)
//! the engine exposes to monitoring and UI collaborators. Response types are
//! plain serde structs; HTTP framing is the collaborator's concern.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{SearchRequest, SubBatch};
use crate::orchestration::{SearchCoordinator, SubBatchManager, WebhookPayload};
use crate::state_machine::{BatchJobStatus, SubBatchStatus};
use crate::store::EnrichmentStore;

/// Sub-batch status roll-up embedded in the job list view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub processing: usize,
    pub pending: usize,
    pub cancelled: usize,
}

impl SubBatchSummary {
    fn from_sub_batches(subs: &[SubBatch]) -> Self {
        let mut summary = Self {
            total: subs.len(),
            ..Self::default()
        };
        for sub in subs {
            match sub.status {
                SubBatchStatus::Completed => summary.completed += 1,
                SubBatchStatus::Failed => summary.failed += 1,
                SubBatchStatus::Processing => summary.processing += 1,
                SubBatchStatus::Pending => summary.pending += 1,
                SubBatchStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// One batch job with its sub-batch roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJobView {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub service: String,
    pub status: BatchJobStatus,
    pub total_records: i32,
    pub processed_records: i32,
    pub failed_records: i32,
    pub progress_percent: f64,
    pub sub_batches: SubBatchSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResponse {
    pub resumed_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
}

/// MonitoringService bundles the engine's externally-consumed operations.
pub struct MonitoringService {
    store: Arc<dyn EnrichmentStore>,
    manager: Arc<SubBatchManager>,
    coordinator: Arc<SearchCoordinator>,
}

impl MonitoringService {
    pub fn new(
        store: Arc<dyn EnrichmentStore>,
        manager: Arc<SubBatchManager>,
        coordinator: Arc<SearchCoordinator>,
    ) -> Self {
        Self {
            store,
            manager,
            coordinator,
        }
    }

    /// Job list for a batch, each with an embedded sub-batch summary.
    pub async fn jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<BatchJobView>> {
        let mut views = Vec::new();
        for job in self.store.jobs_for_batch(batch_id).await? {
            let subs = self.store.sub_batches_for_job(job.id).await?;
            views.push(BatchJobView {
                id: job.id,
                batch_id: job.batch_id,
                service: job.service.clone(),
                status: job.status,
                total_records: job.total_records,
                processed_records: job.processed_records,
                failed_records: job.failed_records,
                progress_percent: job.progress_percent(),
                sub_batches: SubBatchSummary::from_sub_batches(&subs),
            });
        }
        Ok(views)
    }

    /// Full sub-batch rows for a job, `last_error` included, for diagnosis.
    pub async fn sub_batches_for_job(&self, batch_job_id: Uuid) -> Result<Vec<SubBatch>> {
        crate::store::require_job(self.store.as_ref(), batch_job_id).await?;
        self.store.sub_batches_for_job(batch_job_id).await
    }

    pub async fn resume_job(&self, batch_job_id: Uuid) -> Result<ResumeResponse> {
        let resumed_count = self.manager.resume(batch_job_id).await?;
        Ok(ResumeResponse { resumed_count })
    }

    pub async fn cancel_job(&self, batch_job_id: Uuid) -> Result<CancelResponse> {
        let outcome = self.manager.cancel(batch_job_id).await?;
        Ok(CancelResponse {
            success: outcome.success,
        })
    }

    /// All search requests for a batch with status, poll counters, and
    /// timestamps.
    pub async fn searches_for_batch(&self, batch_id: Uuid) -> Result<Vec<SearchRequest>> {
        self.store.searches_for_batch(batch_id).await
    }

    /// Retry a terminal failed/timed-out search; returns the new request.
    pub async fn retry_search(&self, search_id: Uuid) -> Result<SearchRequest> {
        self.coordinator.retry(search_id).await
    }

    pub async fn cancel_search(&self, search_id: Uuid) -> Result<CancelResponse> {
        self.coordinator.cancel(search_id).await?;
        Ok(CancelResponse { success: true })
    }

    /// Push-path ingestion; idempotent with respect to worker polls.
    pub async fn ingest_webhook(&self, payload: WebhookPayload) -> Result<SearchRequest> {
        self.coordinator.ingest_webhook(payload).await
    }
}
