//! Property-based checks for the status-derivation rule table and the
//! chunk decomposition arithmetic.

mod common;

use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use enrichment_core::config::BatchingConfig;
use enrichment_core::models::BatchJob;
use enrichment_core::orchestration::SubBatchManager;
use enrichment_core::state_machine::{BatchJobStatus, SubBatchStatus};
use enrichment_core::store::{EnrichmentStore, MemoryRecordStore, MemoryStore};

use common::test_clock;

fn sub_status() -> impl Strategy<Value = SubBatchStatus> {
    prop_oneof![
        Just(SubBatchStatus::Pending),
        Just(SubBatchStatus::Processing),
        Just(SubBatchStatus::Completed),
        Just(SubBatchStatus::Failed),
        Just(SubBatchStatus::Cancelled),
    ]
}

proptest! {
    #[test]
    fn prop_job_status_follows_rule_table(
        statuses in prop::collection::vec(sub_status(), 0..16)
    ) {
        let derived = BatchJobStatus::derive(&statuses);

        if statuses.is_empty() || statuses.iter().all(|s| *s == SubBatchStatus::Pending) {
            prop_assert_eq!(derived, BatchJobStatus::Pending);
        } else if statuses.iter().any(|s| !s.is_terminal()) {
            prop_assert_eq!(derived, BatchJobStatus::Processing);
        } else if statuses.iter().all(|s| *s == SubBatchStatus::Completed) {
            prop_assert_eq!(derived, BatchJobStatus::Completed);
        } else if statuses.iter().any(|s| *s == SubBatchStatus::Cancelled) {
            prop_assert_eq!(derived, BatchJobStatus::Cancelled);
        } else if statuses.iter().any(|s| *s == SubBatchStatus::Completed) {
            prop_assert_eq!(derived, BatchJobStatus::Partial);
        } else {
            prop_assert_eq!(derived, BatchJobStatus::Failed);
        }

        // A terminal aggregate is only ever derived from all-terminal chunks.
        if derived.is_terminal() {
            prop_assert!(statuses.iter().all(SubBatchStatus::is_terminal));
        }
    }

    #[test]
    fn prop_chunks_partition_the_record_set(
        total in 1usize..400,
        chunk_size in 1usize..64,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let store = Arc::new(MemoryStore::new());
            let records = Arc::new(MemoryRecordStore::new());
            let manager = SubBatchManager::new(
                store.clone(),
                records,
                test_clock(),
                BatchingConfig {
                    chunk_size,
                    max_concurrent_chunks: 3,
                    transient_retry_attempts: 0,
                },
            );

            let ids: Vec<Uuid> = (0..total).map(|_| Uuid::new_v4()).collect();
            let job = manager
                .submit_for_enrichment(Uuid::new_v4(), "supplier_match", ids)
                .await
                .unwrap();
            let subs = store.sub_batches_for_job(job.id).await.unwrap();

            // Contiguous, non-overlapping, covering [0, total) exactly once.
            let mut expected_start = 0i32;
            for (i, sub) in subs.iter().enumerate() {
                assert_eq!(sub.batch_number, i as i32 + 1);
                assert_eq!(sub.total_batches, subs.len() as i32);
                assert_eq!(sub.start_index, expected_start);
                assert_eq!(sub.end_index - sub.start_index, sub.record_count);
                assert!(sub.record_count >= 1);
                assert!(sub.record_count <= chunk_size as i32);
                expected_start = sub.end_index;
            }
            assert_eq!(expected_start, total as i32);

            let counted: i32 = subs.iter().map(|s| s.record_count).sum();
            assert_eq!(counted, job.total_records);
        });
    }

    #[test]
    fn prop_progress_percent_is_clamped(
        total in 0i32..1000,
        processed in 0i32..1500,
    ) {
        let mut job = BatchJob::new(Uuid::new_v4(), "supplier_match", vec![], chrono::Utc::now());
        job.total_records = total;
        job.processed_records = processed;

        let pct = job.progress_percent();
        prop_assert!((0.0..=100.0).contains(&pct));
        if total > 0 && processed <= total {
            let exact = f64::from(processed) / f64::from(total) * 100.0;
            prop_assert!((pct - exact).abs() < 1e-9);
        }
    }
}
