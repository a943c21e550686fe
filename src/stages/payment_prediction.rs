//! Payment-method prediction stage. Last in the pipeline: the model
//! consumes the classification and merchant-match output accumulated by the
//! earlier stages.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StageToggles;
use crate::error::{EnrichmentError, Result};
use crate::models::PayeeRecord;
use crate::orchestration::{ChunkContext, RecordOutcome, RecordProcessor, SubBatchManager};
use crate::services::EnrichmentServiceClient;
use crate::stages::{response_str, StageKind, StageModule, StageOutcome};
use crate::store::RecordStore;

pub struct PaymentPredictionStage {
    records: Arc<dyn RecordStore>,
    manager: Arc<SubBatchManager>,
    client: Arc<dyn EnrichmentServiceClient>,
}

impl PaymentPredictionStage {
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
impl StageModule for PaymentPredictionStage {
    fn kind(&self) -> StageKind {
        StageKind::PaymentPrediction
    }

    async fn execute(&self, batch_id: Uuid, _toggles: &StageToggles) -> Result<StageOutcome> {
        let eligible = self
            .records
            .eligible_for_stage(batch_id, &PayeeRecord::is_classified)
            .await?;
        if eligible.is_empty() {
            return Ok(StageOutcome::Skipped {
                reason: "no classified records to predict".to_string(),
            });
        }

        let ids: Vec<Uuid> = eligible.iter().map(|r| r.id).collect();
        let job = self
            .manager
            .submit_for_enrichment(batch_id, &self.kind().to_string(), ids)
            .await?;

        let processor = Arc::new(PredictionProcessor {
            records: self.records.clone(),
            client: self.client.clone(),
        });
        let job = self.manager.execute_job(job.id, processor).await?;

        Ok(StageOutcome::Completed {
            summary: format!(
                "Predicted payment methods for {}/{} records ({} errors)",
                job.processed_records, job.total_records, job.failed_records
            ),
            processed: job.processed_records.max(0) as u32,
            failed: job.failed_records.max(0) as u32,
        })
    }
}

struct PredictionProcessor {
    records: Arc<dyn RecordStore>,
    client: Arc<dyn EnrichmentServiceClient>,
}

#[async_trait]
impl RecordProcessor for PredictionProcessor {
    async fn process(&self, record: &PayeeRecord, _ctx: ChunkContext) -> Result<RecordOutcome> {
        let name = record.cleaned_name.as_deref().ok_or_else(|| {
            EnrichmentError::Validation(format!("record {} is not classified", record.id))
        })?;

        let response = self
            .client
            .call(serde_json::json!({
                "name": name,
                "payee_type": record.payee_type,
                "merchant_category": record.merchant_category,
                "supplier_id": record.supplier_match.as_ref().map(|m| m.supplier_id.clone()),
            }))
            .await?;

        let mut record = record.clone();
        record.predicted_payment_method = Some(response_str(&response, "payment_method")?);
        record.enrichment_error = None;
        self.records.update_record(&record).await?;
        Ok(RecordOutcome::Applied)
    }
}
