//! Address validation stage. Straight per-record loop: normalizes whatever
//! address came in on the upload and stores the validated form.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StageToggles;
use crate::error::Result;
use crate::services::EnrichmentServiceClient;
use crate::stages::{response_str, with_transient_retry, StageKind, StageModule, StageOutcome};
use crate::store::RecordStore;

pub struct AddressValidationStage {
    records: Arc<dyn RecordStore>,
    client: Arc<dyn EnrichmentServiceClient>,
    transient_retries: u32,
}

impl AddressValidationStage {
    pub fn new(
        records: Arc<dyn RecordStore>,
        client: Arc<dyn EnrichmentServiceClient>,
        transient_retries: u32,
    ) -> Self {
        Self {
            records,
            client,
            transient_retries,
        }
    }
}

#[async_trait]
impl StageModule for AddressValidationStage {
    fn kind(&self) -> StageKind {
        StageKind::AddressValidation
    }

    async fn execute(&self, batch_id: Uuid, _toggles: &StageToggles) -> Result<StageOutcome> {
        let eligible = self
            .records
            .eligible_for_stage(batch_id, &|r: &crate::models::PayeeRecord| {
                r.address.is_some()
            })
            .await?;
        if eligible.is_empty() {
            return Ok(StageOutcome::Skipped {
                reason: "no records with an address".to_string(),
            });
        }

        let total = eligible.len() as u32;
        let mut processed = 0u32;
        let mut failed = 0u32;

        for mut record in eligible {
            let input = serde_json::json!({ "address": record.address });
            let outcome = with_transient_retry(self.transient_retries, || {
                self.client.call(input.clone())
            })
            .await;

            match outcome {
                Ok(response) => {
                    record.validated_address = Some(response_str(&response, "validated_address")?);
                    record.enrichment_error = None;
                    self.records.update_record(&record).await?;
                    processed += 1;
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    record.enrichment_error = Some(err.to_string());
                    self.records.update_record(&record).await?;
                    failed += 1;
                }
            }
        }

        Ok(StageOutcome::Completed {
            summary: format!("Validated {processed}/{total} addresses ({failed} errors)"),
            processed,
            failed,
        })
    }
}
