//! Identity classification stage. First in the pipeline and its only hard
//! prerequisite: every downstream stage reads the `cleaned_name` and
//! `payee_type` it writes.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::StageToggles;
use crate::error::Result;
use crate::services::EnrichmentServiceClient;
use crate::stages::{response_str, with_transient_retry, StageKind, StageModule, StageOutcome};
use crate::store::{require_batch, EnrichmentStore, RecordStore};

pub struct ClassificationStage {
    store: Arc<dyn EnrichmentStore>,
    records: Arc<dyn RecordStore>,
    client: Arc<dyn EnrichmentServiceClient>,
    clock: Arc<dyn Clock>,
    transient_retries: u32,
}

impl ClassificationStage {
    pub fn new(
        store: Arc<dyn EnrichmentStore>,
        records: Arc<dyn RecordStore>,
        client: Arc<dyn EnrichmentServiceClient>,
        clock: Arc<dyn Clock>,
        transient_retries: u32,
    ) -> Self {
        Self {
            store,
            records,
            client,
            clock,
            transient_retries,
        }
    }
}

#[async_trait]
impl StageModule for ClassificationStage {
    fn kind(&self) -> StageKind {
        StageKind::Classification
    }

    async fn execute(&self, batch_id: Uuid, _toggles: &StageToggles) -> Result<StageOutcome> {
        let records = self.records.records_for_batch(batch_id).await?;
        if records.is_empty() {
            return Ok(StageOutcome::Skipped {
                reason: "no records in batch".to_string(),
            });
        }

        let total = records.len() as u32;
        let mut processed = 0u32;
        let mut failed = 0u32;

        for mut record in records {
            let input = serde_json::json!({ "name": record.original_name });
            let outcome = with_transient_retry(self.transient_retries, || {
                self.client.call(input.clone())
            })
            .await;

            match outcome {
                Ok(response) => {
                    record.cleaned_name = Some(response_str(&response, "cleaned_name")?);
                    record.payee_type = Some(
                        response_str(&response, "payee_type")?
                            .parse()
                            .unwrap_or(crate::models::PayeeType::Unknown),
                    );
                    record.enrichment_error = None;
                    self.records.update_record(&record).await?;
                    processed += 1;
                }
                // A transient error that survived its retry budget means the
                // classification service itself is down; that is a whole-stage
                // failure, not a per-record one.
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    record.enrichment_error = Some(err.to_string());
                    self.records.update_record(&record).await?;
                    failed += 1;
                }
            }

            // Durable progress after every record, for concurrent readers.
            let mut batch = require_batch(self.store.as_ref(), batch_id).await?;
            batch.processed_records = processed as i32;
            batch.failed_records = failed as i32;
            batch.progress_message = Some(format!(
                "Classified {processed}/{total} records ({failed} errors)"
            ));
            batch.updated_at = self.clock.now();
            self.store.update_batch(&batch).await?;
        }

        Ok(StageOutcome::Completed {
            summary: format!("Classified {processed}/{total} records ({failed} errors)"),
            processed,
            failed,
        })
    }
}
