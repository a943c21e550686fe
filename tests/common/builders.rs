//! Builders for seeding the in-memory stores with batches and payee records.

use chrono::Utc;
use std::sync::Arc;

use enrichment_core::clock::ManualClock;
use enrichment_core::models::{Batch, NewBatch, PayeeRecord, PayeeType};
use enrichment_core::store::{EnrichmentStore, MemoryRecordStore, MemoryStore, RecordStore};

/// Clock fixed at "now"; tests advance it explicitly.
pub fn test_clock() -> Arc<ManualClock> {
    ManualClock::new(Utc::now())
}

pub fn payee_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Payee {i:03}")).collect()
}

/// Create a batch plus one unclassified record per name, each with an
/// address so every stage has eligible input.
pub async fn seeded_batch(
    store: &MemoryStore,
    records: &MemoryRecordStore,
    names: &[String],
) -> (Batch, Vec<PayeeRecord>) {
    let batch = store
        .create_batch(
            NewBatch {
                label: "integration".into(),
                total_records: names.len() as i32,
            }
            .into_batch(Utc::now()),
        )
        .await
        .unwrap();

    let mut created = Vec::with_capacity(names.len());
    for name in names {
        let record = PayeeRecord::new(batch.id, name, Some("400 Main Street"));
        records.insert(record.clone());
        created.push(record);
    }
    (batch, created)
}

/// Like [`seeded_batch`] but with classification output already applied, for
/// tests exercising the post-classification stages directly.
pub async fn classified_batch(
    store: &MemoryStore,
    records: &MemoryRecordStore,
    payees: &[(&str, PayeeType)],
) -> (Batch, Vec<PayeeRecord>) {
    let names: Vec<String> = payees.iter().map(|(name, _)| (*name).to_string()).collect();
    let (batch, seeded) = seeded_batch(store, records, &names).await;

    let mut classified = Vec::with_capacity(seeded.len());
    for (mut record, (_, payee_type)) in seeded.into_iter().zip(payees) {
        record.cleaned_name = Some(record.original_name.to_uppercase());
        record.payee_type = Some(*payee_type);
        records.update_record(&record).await.unwrap();
        classified.push(record);
    }
    (batch, classified)
}
