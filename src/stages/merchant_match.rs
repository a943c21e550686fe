//! Card-network merchant matching stage. The merchant service is
//! asynchronous, so chunk execution registers one search request per
//! business payee and defers record accounting to the search worker, which
//! finalizes the owning sub-batches as results land.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StageToggles;
use crate::error::{EnrichmentError, Result};
use crate::models::{NewSearchRequest, PayeeRecord};
use crate::orchestration::{
    ChunkContext, RecordOutcome, RecordProcessor, SearchCoordinator, SubBatchManager,
};
use crate::stages::{StageKind, StageModule, StageOutcome};
use crate::store::RecordStore;

pub struct MerchantMatchStage {
    records: Arc<dyn RecordStore>,
    manager: Arc<SubBatchManager>,
    coordinator: Arc<SearchCoordinator>,
    max_poll_attempts: i32,
}

impl MerchantMatchStage {
    pub fn new(
        records: Arc<dyn RecordStore>,
        manager: Arc<SubBatchManager>,
        coordinator: Arc<SearchCoordinator>,
        max_poll_attempts: i32,
    ) -> Self {
        Self {
            records,
            manager,
            coordinator,
            max_poll_attempts,
        }
    }
}

#[async_trait]
impl StageModule for MerchantMatchStage {
    fn kind(&self) -> StageKind {
        StageKind::MerchantMatch
    }

    async fn execute(&self, batch_id: Uuid, _toggles: &StageToggles) -> Result<StageOutcome> {
        // Only business payees have card-network merchant identities.
        let eligible = self
            .records
            .eligible_for_stage(batch_id, &PayeeRecord::is_business)
            .await?;
        if eligible.is_empty() {
            return Ok(StageOutcome::Skipped {
                reason: "no business-classified records".to_string(),
            });
        }

        let ids: Vec<Uuid> = eligible.iter().map(|r| r.id).collect();
        let submitted = ids.len();
        let job = self
            .manager
            .submit_for_enrichment(batch_id, &self.kind().to_string(), ids)
            .await?;

        let processor = Arc::new(MerchantSearchProcessor {
            coordinator: self.coordinator.clone(),
            batch_id,
            max_poll_attempts: self.max_poll_attempts,
        });
        self.manager.execute_job(job.id, processor).await?;

        Ok(StageOutcome::Completed {
            summary: format!(
                "Submitted {submitted} merchant searches; results arrive asynchronously"
            ),
            processed: 0,
            failed: 0,
        })
    }
}

struct MerchantSearchProcessor {
    coordinator: Arc<SearchCoordinator>,
    batch_id: Uuid,
    max_poll_attempts: i32,
}

#[async_trait]
impl RecordProcessor for MerchantSearchProcessor {
    async fn process(&self, record: &PayeeRecord, ctx: ChunkContext) -> Result<RecordOutcome> {
        let name = record.cleaned_name.as_deref().ok_or_else(|| {
            EnrichmentError::Validation(format!("record {} is not classified", record.id))
        })?;

        self.coordinator
            .submit(NewSearchRequest {
                batch_id: self.batch_id,
                record_id: record.id,
                sub_batch_id: Some(ctx.sub_batch_id),
                search_type: StageKind::MerchantMatch.to_string(),
                request_payload: serde_json::json!({
                    "name": name,
                    "address": record.validated_address.as_deref().or(record.address.as_deref()),
                }),
                max_poll_attempts: self.max_poll_attempts,
            })
            .await?;
        Ok(RecordOutcome::Deferred)
    }
}
