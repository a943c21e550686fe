//! In-memory store backends. Used by the test suite and by embedders that
//! want the engine without a database; the semantics match `PgStore` row for
//! row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Batch, BatchJob, BatchStage, PayeeRecord, SearchRequest, SubBatch};
use crate::stages::StageKind;
use crate::store::{EnrichmentStore, RecordStore};

/// DashMap-backed implementation of [`EnrichmentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    batches: DashMap<Uuid, Batch>,
    stages: DashMap<(Uuid, StageKind), BatchStage>,
    jobs: DashMap<Uuid, BatchJob>,
    sub_batches: DashMap<Uuid, SubBatch>,
    searches: DashMap<Uuid, SearchRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnrichmentStore for MemoryStore {
    async fn create_batch(&self, batch: Batch) -> Result<Batch> {
        self.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn batch(&self, id: Uuid) -> Result<Option<Batch>> {
        Ok(self.batches.get(&id).map(|b| b.clone()))
    }

    async fn update_batch(&self, batch: &Batch) -> Result<()> {
        self.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn stage(&self, batch_id: Uuid, kind: StageKind) -> Result<Option<BatchStage>> {
        Ok(self.stages.get(&(batch_id, kind)).map(|s| s.clone()))
    }

    async fn stages_for_batch(&self, batch_id: Uuid) -> Result<Vec<BatchStage>> {
        let mut stages: Vec<BatchStage> = self
            .stages
            .iter()
            .filter(|entry| entry.key().0 == batch_id)
            .map(|entry| entry.value().clone())
            .collect();
        stages.sort_by_key(|s| s.stage.order());
        Ok(stages)
    }

    async fn upsert_stage(&self, stage: &BatchStage) -> Result<()> {
        self.stages
            .insert((stage.batch_id, stage.stage), stage.clone());
        Ok(())
    }

    async fn create_job(&self, job: BatchJob) -> Result<BatchJob> {
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn job(&self, id: Uuid) -> Result<Option<BatchJob>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn jobs_for_batch(&self, batch_id: Uuid) -> Result<Vec<BatchJob>> {
        let mut jobs: Vec<BatchJob> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().batch_id == batch_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn update_job(&self, job: &BatchJob) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn create_sub_batches(&self, subs: &[SubBatch]) -> Result<()> {
        for sub in subs {
            self.sub_batches.insert(sub.id, sub.clone());
        }
        Ok(())
    }

    async fn sub_batch(&self, id: Uuid) -> Result<Option<SubBatch>> {
        Ok(self.sub_batches.get(&id).map(|s| s.clone()))
    }

    async fn sub_batches_for_job(&self, batch_job_id: Uuid) -> Result<Vec<SubBatch>> {
        let mut subs: Vec<SubBatch> = self
            .sub_batches
            .iter()
            .filter(|entry| entry.value().batch_job_id == batch_job_id)
            .map(|entry| entry.value().clone())
            .collect();
        subs.sort_by_key(|s| s.batch_number);
        Ok(subs)
    }

    async fn update_sub_batch(&self, sub: &SubBatch) -> Result<()> {
        self.sub_batches.insert(sub.id, sub.clone());
        Ok(())
    }

    async fn create_search(&self, search: SearchRequest) -> Result<SearchRequest> {
        self.searches.insert(search.id, search.clone());
        Ok(search)
    }

    async fn search(&self, id: Uuid) -> Result<Option<SearchRequest>> {
        Ok(self.searches.get(&id).map(|s| s.clone()))
    }

    async fn search_by_external_id(
        &self,
        external_search_id: &str,
    ) -> Result<Option<SearchRequest>> {
        Ok(self
            .searches
            .iter()
            .find(|entry| {
                entry.value().external_search_id.as_deref() == Some(external_search_id)
            })
            .map(|entry| entry.value().clone()))
    }

    async fn searches_for_batch(&self, batch_id: Uuid) -> Result<Vec<SearchRequest>> {
        let mut searches: Vec<SearchRequest> = self
            .searches
            .iter()
            .filter(|entry| entry.value().batch_id == batch_id)
            .map(|entry| entry.value().clone())
            .collect();
        searches.sort_by_key(|s| s.created_at);
        Ok(searches)
    }

    async fn update_search(&self, search: &SearchRequest) -> Result<()> {
        self.searches.insert(search.id, search.clone());
        Ok(())
    }

    async fn due_searches(&self, polled_before: DateTime<Utc>) -> Result<Vec<SearchRequest>> {
        let mut due: Vec<SearchRequest> = self
            .searches
            .iter()
            .filter(|entry| {
                let search = entry.value();
                search.status.is_pollable()
                    && search
                        .last_polled_at
                        .map_or(true, |polled| polled < polled_before)
            })
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|s| s.created_at);
        Ok(due)
    }
}

/// DashMap-backed implementation of the [`RecordStore`] collaborator
/// contract, preserving insertion order per batch.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<Uuid, PayeeRecord>,
    // Insertion order per batch; DashMap iteration order is not stable.
    order: DashMap<Uuid, Vec<Uuid>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: PayeeRecord) {
        self.order
            .entry(record.batch_id)
            .or_default()
            .push(record.id);
        self.records.insert(record.id, record);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn records_for_batch(&self, batch_id: Uuid) -> Result<Vec<PayeeRecord>> {
        let Some(ids) = self.order.get(&batch_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .collect())
    }

    async fn record(&self, id: Uuid) -> Result<Option<PayeeRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn update_record(&self, record: &PayeeRecord) -> Result<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewBatch;
    use crate::state_machine::SearchStatus;
    use chrono::Duration;

    fn batch() -> Batch {
        NewBatch {
            label: "test".into(),
            total_records: 3,
        }
        .into_batch(Utc::now())
    }

    #[tokio::test]
    async fn test_batch_round_trip() {
        let store = MemoryStore::new();
        let created = store.create_batch(batch()).await.unwrap();
        let loaded = store.batch(created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert!(store.batch(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_due_searches_respects_backoff() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut search = crate::models::NewSearchRequest {
            batch_id: Uuid::new_v4(),
            record_id: Uuid::new_v4(),
            sub_batch_id: None,
            search_type: "merchant_match".into(),
            request_payload: serde_json::json!({}),
            max_poll_attempts: 5,
        }
        .into_search(now);
        search.status = SearchStatus::Polling;
        search.last_polled_at = Some(now);
        store.create_search(search.clone()).await.unwrap();

        // Not yet due: polled just now.
        assert!(store
            .due_searches(now - Duration::seconds(10))
            .await
            .unwrap()
            .is_empty());
        // Due once the cutoff passes the last poll.
        assert_eq!(
            store
                .due_searches(now + Duration::seconds(10))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_eligible_for_stage_filters_with_predicate() {
        let store = MemoryRecordStore::new();
        let batch_id = Uuid::new_v4();
        let mut business = PayeeRecord::new(batch_id, "Acme Supply Inc", None);
        business.cleaned_name = Some("ACME SUPPLY INC".into());
        business.payee_type = Some(crate::models::PayeeType::Business);
        store.insert(business);
        store.insert(PayeeRecord::new(batch_id, "Jane Porter", Some("400 Main St")));

        // Both a method reference and a closure coerce to the predicate.
        let businesses = store
            .eligible_for_stage(batch_id, &PayeeRecord::is_business)
            .await
            .unwrap();
        assert_eq!(businesses.len(), 1);
        assert_eq!(businesses[0].original_name, "Acme Supply Inc");

        let with_address = store
            .eligible_for_stage(batch_id, &|r: &PayeeRecord| r.address.is_some())
            .await
            .unwrap();
        assert_eq!(with_address.len(), 1);
        assert_eq!(with_address[0].original_name, "Jane Porter");
    }

    #[tokio::test]
    async fn test_record_order_preserved() {
        let store = MemoryRecordStore::new();
        let batch_id = Uuid::new_v4();
        for name in ["a", "b", "c"] {
            store.insert(PayeeRecord::new(batch_id, name, None));
        }
        let names: Vec<String> = store
            .records_for_batch(batch_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.original_name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
