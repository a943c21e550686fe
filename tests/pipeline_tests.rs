//! End-to-end pipeline tests: five stages over an in-memory batch, with
//! stage isolation, toggles, and cancellation.

mod common;

use serde_json::json;
use std::sync::Arc;

use enrichment_core::clock::ManualClock;
use enrichment_core::config::{BatchingConfig, SearchWorkerConfig, StageToggles};
use enrichment_core::error::EnrichmentError;
use enrichment_core::models::PayeeType;
use enrichment_core::orchestration::{PipelineOrchestrator, SearchCoordinator, SubBatchManager};
use enrichment_core::services::PollOutcome;
use enrichment_core::stages::{
    AddressValidationStage, ClassificationStage, MerchantMatchStage, PaymentPredictionStage,
    StageKind, StageModule, SupplierMatchStage,
};
use enrichment_core::state_machine::{BatchJobStatus, BatchStatus, SearchStatus, StageStatus};
use enrichment_core::store::{EnrichmentStore, MemoryRecordStore, MemoryStore, RecordStore};

use common::{seeded_batch, test_clock, ScriptedSearchClient, ScriptedService};

struct Engine {
    store: Arc<MemoryStore>,
    records: Arc<MemoryRecordStore>,
    #[allow(dead_code)]
    clock: Arc<ManualClock>,
    coordinator: Arc<SearchCoordinator>,
    search_client: Arc<ScriptedSearchClient>,
    orchestrator: PipelineOrchestrator,
}

fn classify_ok() -> Arc<ScriptedService> {
    ScriptedService::new("classification", |input| {
        let name = input["name"].as_str().unwrap_or_default().to_string();
        let payee_type = if name.ends_with("Inc") {
            "business"
        } else {
            "individual"
        };
        Ok(json!({ "cleaned_name": name.to_uppercase(), "payee_type": payee_type }))
    })
}

fn supplier_ok() -> Arc<ScriptedService> {
    ScriptedService::new("supplier_match", |input| {
        // Individuals get a weak candidate that falls below the threshold.
        let confidence = if input["payee_type"] == json!("business") {
            0.92
        } else {
            0.40
        };
        Ok(json!({ "supplier_id": "sup-77", "confidence": confidence }))
    })
}

fn address_ok() -> Arc<ScriptedService> {
    ScriptedService::new("address_validation", |input| {
        let address = input["address"].as_str().unwrap_or_default().to_uppercase();
        Ok(json!({ "validated_address": format!("{address}, US") }))
    })
}

fn predict_ok() -> Arc<ScriptedService> {
    ScriptedService::new("payment_prediction", |_| {
        Ok(json!({ "payment_method": "ach" }))
    })
}

fn engine(
    classify: Arc<ScriptedService>,
    supplier: Arc<ScriptedService>,
    address: Arc<ScriptedService>,
    predict: Arc<ScriptedService>,
) -> Engine {
    let store = Arc::new(MemoryStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let clock = test_clock();

    let manager = Arc::new(SubBatchManager::new(
        store.clone(),
        records.clone(),
        clock.clone(),
        BatchingConfig::default(),
    ));
    let coordinator = Arc::new(SearchCoordinator::new(
        store.clone(),
        records.clone(),
        clock.clone(),
        SearchWorkerConfig::default(),
    ));
    let search_client = ScriptedSearchClient::new("merchant_match");
    coordinator.register_client(search_client.clone());

    let stages: Vec<Arc<dyn StageModule>> = vec![
        Arc::new(ClassificationStage::new(
            store.clone(),
            records.clone(),
            classify,
            clock.clone(),
            1,
        )),
        Arc::new(SupplierMatchStage::new(
            records.clone(),
            manager.clone(),
            supplier,
        )),
        Arc::new(AddressValidationStage::new(records.clone(), address, 1)),
        Arc::new(MerchantMatchStage::new(
            records.clone(),
            manager.clone(),
            coordinator.clone(),
            5,
        )),
        Arc::new(PaymentPredictionStage::new(
            records.clone(),
            manager.clone(),
            predict,
        )),
    ];
    let orchestrator =
        PipelineOrchestrator::new(store.clone(), clock.clone(), stages).unwrap();

    Engine {
        store,
        records,
        clock: clock.clone(),
        coordinator,
        search_client,
        orchestrator,
    }
}

fn default_engine() -> Engine {
    engine(classify_ok(), supplier_ok(), address_ok(), predict_ok())
}

fn payees() -> Vec<String> {
    vec![
        "Acme Supply Inc".into(),
        "Jane Porter".into(),
        "Bolt Freight Inc".into(),
    ]
}

#[tokio::test]
async fn test_full_pipeline_enriches_every_record() {
    let e = default_engine();
    let (batch, seeded) = seeded_batch(&e.store, &e.records, &payees()).await;

    let batch = e
        .orchestrator
        .run_batch(batch.id, &StageToggles::default())
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert!(batch.current_step.is_none());

    let stages = e.store.stages_for_batch(batch.id).await.unwrap();
    assert_eq!(stages.len(), 5);
    assert!(stages.iter().all(|s| s.status == StageStatus::Completed));

    let acme = e.records.record(seeded[0].id).await.unwrap().unwrap();
    assert_eq!(acme.cleaned_name.as_deref(), Some("ACME SUPPLY INC"));
    assert_eq!(acme.payee_type, Some(PayeeType::Business));
    assert_eq!(
        acme.supplier_match.as_ref().map(|m| m.supplier_id.as_str()),
        Some("sup-77")
    );
    assert_eq!(
        acme.validated_address.as_deref(),
        Some("400 MAIN STREET, US")
    );
    assert_eq!(acme.predicted_payment_method.as_deref(), Some("ach"));

    // The weak supplier candidate for the individual was discarded.
    let jane = e.records.record(seeded[1].id).await.unwrap().unwrap();
    assert_eq!(jane.payee_type, Some(PayeeType::Individual));
    assert!(jane.supplier_match.is_none());

    // Merchant matching submitted one search per business payee; they stay
    // outstanding until the worker polls them.
    assert_eq!(e.search_client.submission_count(), 2);
    let searches = e.store.searches_for_batch(batch.id).await.unwrap();
    assert_eq!(searches.len(), 2);
    assert!(searches
        .iter()
        .all(|s| s.status == SearchStatus::Submitted));

    e.search_client.script_poll(
        "ext-1",
        vec![PollOutcome::Completed(
            json!({ "merchant_category": "wholesale" }),
        )],
    );
    e.search_client.script_poll(
        "ext-2",
        vec![PollOutcome::Completed(
            json!({ "merchant_category": "freight" }),
        )],
    );
    let summary = e.coordinator.poll_due().await.unwrap();
    assert_eq!(summary.completed, 2);

    let acme = e.records.record(seeded[0].id).await.unwrap().unwrap();
    assert_eq!(acme.merchant_category.as_deref(), Some("wholesale"));

    // The merchant job finalizes once its deferred searches land.
    let jobs = e.store.jobs_for_batch(batch.id).await.unwrap();
    let merchant_job = jobs
        .iter()
        .find(|j| j.service == "merchant_match")
        .unwrap();
    assert_eq!(merchant_job.status, BatchJobStatus::Completed);
    assert_eq!(merchant_job.processed_records, 2);
}

#[tokio::test]
async fn test_classification_outage_aborts_the_pipeline() {
    let e = engine(
        ScriptedService::unavailable("classification"),
        supplier_ok(),
        address_ok(),
        predict_ok(),
    );
    let (batch, _) = seeded_batch(&e.store, &e.records, &payees()).await;

    let err = e
        .orchestrator
        .run_batch(batch.id, &StageToggles::default())
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let batch = e.store.batch(batch.id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);

    // Classification is the hard prerequisite: no downstream stage ran.
    let stages = e.store.stages_for_batch(batch.id).await.unwrap();
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0].stage, StageKind::Classification);
    assert_eq!(stages[0].status, StageStatus::Error);
}

#[tokio::test]
async fn test_later_stage_error_is_isolated() {
    let e = engine(
        classify_ok(),
        supplier_ok(),
        ScriptedService::unavailable("address_validation"),
        predict_ok(),
    );
    let (batch, _) = seeded_batch(&e.store, &e.records, &payees()).await;

    let err = e
        .orchestrator
        .run_batch(batch.id, &StageToggles::default())
        .await
        .unwrap_err();
    assert!(err.is_transient());

    // The address failure is recorded, but the stages behind it still ran.
    let stages = e.store.stages_for_batch(batch.id).await.unwrap();
    let statuses: Vec<StageStatus> = stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        [
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Error,
            StageStatus::Completed,
            StageStatus::Completed,
        ]
    );

    let batch = e.store.batch(batch.id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
}

#[tokio::test]
async fn test_stage_with_only_record_failures_lands_failed() {
    let e = engine(
        ScriptedService::new("classification", |_| {
            Err(EnrichmentError::TerminalService("unrecognized name".into()))
        }),
        supplier_ok(),
        address_ok(),
        predict_ok(),
    );
    let (batch, seeded) = seeded_batch(&e.store, &e.records, &payees()).await;

    // Per-record rejections are contained failures, not a stage error: the
    // pipeline keeps going and the batch itself completes.
    let batch = e
        .orchestrator
        .run_batch(batch.id, &StageToggles::default())
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    // Classification produced nothing but rejections, so its stage row lands
    // failed; the stages that need its output find no eligible records.
    let stages = e.store.stages_for_batch(batch.id).await.unwrap();
    let statuses: Vec<StageStatus> = stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        [
            StageStatus::Failed,
            StageStatus::Skipped,
            StageStatus::Completed,
            StageStatus::Skipped,
            StageStatus::Skipped,
        ]
    );

    let record = e.records.record(seeded[0].id).await.unwrap().unwrap();
    assert!(record.enrichment_error.is_some());
    assert!(record.payee_type.is_none());
}

#[tokio::test]
async fn test_disabled_stage_is_skipped() {
    let e = default_engine();
    let (batch, _) = seeded_batch(&e.store, &e.records, &payees()).await;

    let toggles = StageToggles {
        enable_merchant_match: false,
        ..StageToggles::default()
    };
    let batch = e.orchestrator.run_batch(batch.id, &toggles).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    let merchant = e
        .store
        .stage(batch.id, StageKind::MerchantMatch)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(merchant.status, StageStatus::Skipped);
    assert!(merchant.message.as_deref().unwrap().contains("disabled"));
    assert_eq!(e.search_client.submission_count(), 0);
}

#[tokio::test]
async fn test_empty_batch_skips_every_stage() {
    let e = default_engine();
    let (batch, _) = seeded_batch(&e.store, &e.records, &[]).await;

    let batch = e
        .orchestrator
        .run_batch(batch.id, &StageToggles::default())
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    let stages = e.store.stages_for_batch(batch.id).await.unwrap();
    assert_eq!(stages.len(), 5);
    assert!(stages.iter().all(|s| s.status == StageStatus::Skipped));
}

#[tokio::test]
async fn test_cancelled_batch_stops_starting_stages() {
    let e = default_engine();
    let (mut batch, _) = seeded_batch(&e.store, &e.records, &payees()).await;
    batch.status = BatchStatus::Cancelled;
    e.store.update_batch(&batch).await.unwrap();

    let results = e
        .orchestrator
        .run(batch.id, &StageToggles::default())
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.status == StageStatus::Cancelled));
    assert_eq!(e.search_client.submission_count(), 0);
}

#[tokio::test]
async fn test_cancel_batch_is_idempotent() {
    let e = default_engine();
    let (batch, _) = seeded_batch(&e.store, &e.records, &payees()).await;

    let cancelled = e.orchestrator.cancel_batch(batch.id).await.unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);
    let stages = e.store.stages_for_batch(batch.id).await.unwrap();
    assert_eq!(stages.len(), 5);
    assert!(stages.iter().all(|s| s.status == StageStatus::Cancelled));

    let again = e.orchestrator.cancel_batch(batch.id).await.unwrap();
    assert_eq!(again.status, BatchStatus::Cancelled);
}

#[tokio::test]
async fn test_duplicate_stage_modules_rejected() {
    let store = Arc::new(MemoryStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let clock = test_clock();

    let duplicate: Vec<Arc<dyn StageModule>> = vec![
        Arc::new(ClassificationStage::new(
            store.clone(),
            records.clone(),
            classify_ok(),
            clock.clone(),
            1,
        )),
        Arc::new(ClassificationStage::new(
            store.clone(),
            records.clone(),
            classify_ok(),
            clock.clone(),
            1,
        )),
    ];
    let result = PipelineOrchestrator::new(store, clock, duplicate);
    assert!(matches!(result, Err(EnrichmentError::Validation(_))));
}
