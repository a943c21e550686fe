//! Tests for the monitoring surface: job and sub-batch views plus the
//! corrective resume/cancel/retry actions.

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use enrichment_core::config::{BatchingConfig, SearchWorkerConfig};
use enrichment_core::error::{EnrichmentError, Result};
use enrichment_core::models::{NewSearchRequest, PayeeRecord};
use enrichment_core::monitor::MonitoringService;
use enrichment_core::orchestration::{
    ChunkContext, RecordOutcome, RecordProcessor, SearchCoordinator, SubBatchManager,
    WebhookPayload,
};
use enrichment_core::services::PollOutcome;
use enrichment_core::state_machine::{BatchJobStatus, SearchStatus, SubBatchStatus};
use enrichment_core::store::{EnrichmentStore, MemoryRecordStore, MemoryStore, RecordStore};

use common::{payee_names, seeded_batch, test_clock, ScriptedSearchClient};

struct Harness {
    store: Arc<MemoryStore>,
    records: Arc<MemoryRecordStore>,
    manager: Arc<SubBatchManager>,
    coordinator: Arc<SearchCoordinator>,
    client: Arc<ScriptedSearchClient>,
    monitor: MonitoringService,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let clock = test_clock();
    let manager = Arc::new(SubBatchManager::new(
        store.clone(),
        records.clone(),
        clock.clone(),
        BatchingConfig {
            chunk_size: 5,
            max_concurrent_chunks: 3,
            transient_retry_attempts: 0,
        },
    ));
    let coordinator = Arc::new(SearchCoordinator::new(
        store.clone(),
        records.clone(),
        clock,
        SearchWorkerConfig::default(),
    ));
    let client = ScriptedSearchClient::new("merchant_match");
    coordinator.register_client(client.clone());
    let monitor = MonitoringService::new(store.clone(), manager.clone(), coordinator.clone());
    Harness {
        store,
        records,
        manager,
        coordinator,
        client,
        monitor,
    }
}

struct FailSecondChunk;

#[async_trait]
impl RecordProcessor for FailSecondChunk {
    async fn process(&self, record: &PayeeRecord, _ctx: ChunkContext) -> Result<RecordOutcome> {
        if record.original_name == "Payee 005" {
            return Err(EnrichmentError::TransientService(
                "service unavailable".into(),
            ));
        }
        Ok(RecordOutcome::Applied)
    }
}

#[tokio::test]
async fn test_job_view_embeds_sub_batch_summary() {
    let h = harness();
    let (batch, seeded) = seeded_batch(&h.store, &h.records, &payee_names(10)).await;

    let ids = seeded.iter().map(|r| r.id).collect();
    let job = h
        .manager
        .submit_for_enrichment(batch.id, "supplier_match", ids)
        .await
        .unwrap();
    h.manager
        .execute_job(job.id, Arc::new(FailSecondChunk))
        .await
        .unwrap();

    let views = h.monitor.jobs_for_batch(batch.id).await.unwrap();
    assert_eq!(views.len(), 1);
    let view = &views[0];
    assert_eq!(view.service, "supplier_match");
    assert_eq!(view.status, BatchJobStatus::Partial);
    assert_eq!(view.total_records, 10);
    assert_eq!(view.processed_records, 5);
    assert_eq!(view.progress_percent, 50.0);
    assert_eq!(view.sub_batches.total, 2);
    assert_eq!(view.sub_batches.completed, 1);
    assert_eq!(view.sub_batches.failed, 1);
    assert_eq!(view.sub_batches.pending, 0);

    // The failed chunk's detail carries the error for diagnosis.
    let subs = h.monitor.sub_batches_for_job(job.id).await.unwrap();
    assert_eq!(subs[1].status, SubBatchStatus::Failed);
    assert!(subs[1].last_error.is_some());
}

#[tokio::test]
async fn test_sub_batch_detail_for_missing_job() {
    let h = harness();
    let result = h.monitor.sub_batches_for_job(Uuid::new_v4()).await;
    assert!(matches!(result, Err(EnrichmentError::NotFound(_))));
}

#[tokio::test]
async fn test_resume_and_cancel_responses() {
    let h = harness();
    let (batch, seeded) = seeded_batch(&h.store, &h.records, &payee_names(10)).await;

    let ids = seeded.iter().map(|r| r.id).collect();
    let job = h
        .manager
        .submit_for_enrichment(batch.id, "supplier_match", ids)
        .await
        .unwrap();
    h.manager
        .execute_job(job.id, Arc::new(FailSecondChunk))
        .await
        .unwrap();

    let resumed = h.monitor.resume_job(job.id).await.unwrap();
    assert_eq!(resumed.resumed_count, 1);
    let resumed_again = h.monitor.resume_job(job.id).await.unwrap();
    assert_eq!(resumed_again.resumed_count, 0);

    let cancelled = h.monitor.cancel_job(job.id).await.unwrap();
    assert!(cancelled.success);
    let job = h.store.job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, BatchJobStatus::Cancelled);
}

#[tokio::test]
async fn test_search_views_and_actions() {
    let h = harness();
    let (batch, seeded) = seeded_batch(&h.store, &h.records, &payee_names(1)).await;

    h.client
        .script_poll("ext-1", vec![PollOutcome::Failed("no match".into())]);
    let search = h
        .coordinator
        .submit(NewSearchRequest {
            batch_id: batch.id,
            record_id: seeded[0].id,
            sub_batch_id: None,
            search_type: "merchant_match".into(),
            request_payload: json!({ "name": "ACME" }),
            max_poll_attempts: 5,
        })
        .await
        .unwrap();
    h.coordinator.poll_due().await.unwrap();

    let listed = h.monitor.searches_for_batch(batch.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SearchStatus::Failed);
    assert_eq!(listed[0].poll_attempts, 1);
    assert!(listed[0].last_polled_at.is_some());

    let retried = h.monitor.retry_search(search.id).await.unwrap();
    assert_eq!(retried.status, SearchStatus::Submitted);
    assert_ne!(retried.id, search.id);

    let cancelled = h.monitor.cancel_search(retried.id).await.unwrap();
    assert!(cancelled.success);
    let row = h.store.search(retried.id).await.unwrap().unwrap();
    assert_eq!(row.status, SearchStatus::Cancelled);
}

#[tokio::test]
async fn test_webhook_ingestion_through_monitor() {
    let h = harness();
    let (batch, seeded) = seeded_batch(&h.store, &h.records, &payee_names(1)).await;

    h.coordinator
        .submit(NewSearchRequest {
            batch_id: batch.id,
            record_id: seeded[0].id,
            sub_batch_id: None,
            search_type: "merchant_match".into(),
            request_payload: json!({ "name": "ACME" }),
            max_poll_attempts: 5,
        })
        .await
        .unwrap();

    let row = h
        .monitor
        .ingest_webhook(WebhookPayload {
            search_id: "ext-1".into(),
            status: "completed".into(),
            result: Some(json!({ "merchant_category": "retail" })),
            error: None,
        })
        .await
        .unwrap();
    assert_eq!(row.status, SearchStatus::Completed);

    let record = h.records.record(seeded[0].id).await.unwrap().unwrap();
    assert_eq!(record.merchant_category.as_deref(), Some("retail"));
}
