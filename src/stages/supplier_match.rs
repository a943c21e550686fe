//! Supplier-network matching stage. Fans the batch out through the
//! sub-batch manager; a match is accepted only at or above the configured
//! confidence threshold.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StageToggles;
use crate::error::{EnrichmentError, Result};
use crate::models::{PayeeRecord, SupplierMatch};
use crate::orchestration::{ChunkContext, RecordOutcome, RecordProcessor, SubBatchManager};
use crate::services::EnrichmentServiceClient;
use crate::stages::{StageKind, StageModule, StageOutcome};
use crate::store::RecordStore;

pub struct SupplierMatchStage {
    records: Arc<dyn RecordStore>,
    manager: Arc<SubBatchManager>,
    client: Arc<dyn EnrichmentServiceClient>,
}

impl SupplierMatchStage {
    pub fn new(
        records: Arc<dyn RecordStore>,
        manager: Arc<SubBatchManager>,
        client: Arc<dyn EnrichmentServiceClient>,
    ) -> Self {
        Self {
            records,
            manager,
            client,
        }
    }
}

#[async_trait]
impl StageModule for SupplierMatchStage {
    fn kind(&self) -> StageKind {
        StageKind::SupplierMatch
    }

    async fn execute(&self, batch_id: Uuid, toggles: &StageToggles) -> Result<StageOutcome> {
        let eligible = self
            .records
            .eligible_for_stage(batch_id, &PayeeRecord::is_classified)
            .await?;
        if eligible.is_empty() {
            return Ok(StageOutcome::Skipped {
                reason: "no classified records to match".to_string(),
            });
        }

        let ids: Vec<Uuid> = eligible.iter().map(|r| r.id).collect();
        let job = self
            .manager
            .submit_for_enrichment(batch_id, &self.kind().to_string(), ids)
            .await?;

        let processor = Arc::new(SupplierMatchProcessor {
            records: self.records.clone(),
            client: self.client.clone(),
            confidence_threshold: toggles.confidence_threshold,
        });
        let job = self.manager.execute_job(job.id, processor).await?;

        Ok(StageOutcome::Completed {
            summary: format!(
                "Matched {}/{} records against the supplier network ({} errors)",
                job.processed_records, job.total_records, job.failed_records
            ),
            processed: job.processed_records.max(0) as u32,
            failed: job.failed_records.max(0) as u32,
        })
    }
}

struct SupplierMatchProcessor {
    records: Arc<dyn RecordStore>,
    client: Arc<dyn EnrichmentServiceClient>,
    confidence_threshold: f64,
}

#[async_trait]
impl RecordProcessor for SupplierMatchProcessor {
    async fn process(&self, record: &PayeeRecord, _ctx: ChunkContext) -> Result<RecordOutcome> {
        let name = record.cleaned_name.as_deref().ok_or_else(|| {
            EnrichmentError::Validation(format!("record {} is not classified", record.id))
        })?;

        let response = self
            .client
            .call(serde_json::json!({ "name": name, "payee_type": record.payee_type }))
            .await?;

        let confidence = response
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let supplier_id = response.get("supplier_id").and_then(|v| v.as_str());

        let mut record = record.clone();
        record.supplier_match = match supplier_id {
            // Below-threshold candidates are discarded, not recorded.
            Some(id) if confidence >= self.confidence_threshold => Some(SupplierMatch {
                supplier_id: id.to_string(),
                confidence,
            }),
            _ => None,
        };
        record.enrichment_error = None;
        self.records.update_record(&record).await?;
        Ok(RecordOutcome::Applied)
    }
}
