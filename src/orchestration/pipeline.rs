//! # Pipeline Orchestrator
//!
//! Sequences the enrichment stages over one batch in their fixed order,
//! persisting every stage transition immediately so concurrent monitoring
//! readers always observe monotonic progress. One stage's failure is
//! isolated from the others; only classification, whose output every
//! downstream stage reads, aborts the rest of the pipeline.

use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::StageToggles;
use crate::error::{EnrichmentError, Result};
use crate::logging::log_stage_operation;
use crate::models::{Batch, BatchStage};
use crate::stages::{StageKind, StageModule, StageOutcome};
use crate::state_machine::{BatchStatus, StageStatus};
use crate::store::{require_batch, EnrichmentStore};

/// Per-stage result of one pipeline run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageRunResult {
    pub stage: StageKind,
    pub status: StageStatus,
    pub message: Option<String>,
}

/// PipelineOrchestrator runs the ordered stage list over a batch.
pub struct PipelineOrchestrator {
    store: Arc<dyn EnrichmentStore>,
    clock: Arc<dyn Clock>,
    stages: Vec<Arc<dyn StageModule>>,
}

impl PipelineOrchestrator {
    /// Build an orchestrator over the given stage modules. Stages are run in
    /// their fixed pipeline order regardless of the order given here;
    /// duplicate kinds are rejected.
    pub fn new(
        store: Arc<dyn EnrichmentStore>,
        clock: Arc<dyn Clock>,
        mut stages: Vec<Arc<dyn StageModule>>,
    ) -> Result<Self> {
        stages.sort_by_key(|s| s.kind().order());
        for pair in stages.windows(2) {
            if pair[0].kind() == pair[1].kind() {
                return Err(EnrichmentError::Validation(format!(
                    "duplicate stage module for `{}`",
                    pair[0].kind()
                )));
            }
        }
        Ok(Self {
            store,
            clock,
            stages,
        })
    }

    /// Run every enabled stage over the batch. Stage errors are recorded on
    /// the stage row and re-raised to the caller; for any stage other than
    /// classification the remaining stages still run first.
    pub async fn run(&self, batch_id: Uuid, toggles: &StageToggles) -> Result<Vec<StageRunResult>> {
        require_batch(self.store.as_ref(), batch_id).await?;

        let mut results = Vec::with_capacity(self.stages.len());
        let mut first_error: Option<EnrichmentError> = None;

        for stage in &self.stages {
            let kind = stage.kind();

            // A cancelled batch stops starting new stages.
            let mut batch = require_batch(self.store.as_ref(), batch_id).await?;
            if batch.status == BatchStatus::Cancelled {
                let message = "batch cancelled";
                self.transition_stage(batch_id, kind, StageStatus::Cancelled, Some(message))
                    .await?;
                results.push(StageRunResult {
                    stage: kind,
                    status: StageStatus::Cancelled,
                    message: Some(message.to_string()),
                });
                continue;
            }

            if !toggles.enabled(kind) {
                let message = format!("{} disabled for this batch", kind.label());
                self.transition_stage(batch_id, kind, StageStatus::Skipped, Some(&message))
                    .await?;
                results.push(StageRunResult {
                    stage: kind,
                    status: StageStatus::Skipped,
                    message: Some(message),
                });
                continue;
            }

            let step_message = format!("Running {}", kind.label());
            self.transition_stage(batch_id, kind, StageStatus::Processing, Some(&step_message))
                .await?;
            batch.current_step = Some(kind.label().to_string());
            batch.progress_message = Some(step_message);
            batch.updated_at = self.clock.now();
            self.store.update_batch(&batch).await?;

            match stage.execute(batch_id, toggles).await {
                Ok(StageOutcome::Completed {
                    summary,
                    processed,
                    failed,
                }) => {
                    // A stage that ran but produced nothing except record
                    // failures lands `failed`; any success keeps `completed`.
                    let status = if processed == 0 && failed > 0 {
                        StageStatus::Failed
                    } else {
                        StageStatus::Completed
                    };
                    self.transition_stage(batch_id, kind, status, Some(&summary))
                        .await?;
                    let mut batch = require_batch(self.store.as_ref(), batch_id).await?;
                    batch.progress_message = Some(summary.clone());
                    batch.updated_at = self.clock.now();
                    self.store.update_batch(&batch).await?;
                    log_stage_operation(
                        "stage_completed",
                        batch_id,
                        &kind.to_string(),
                        &status.to_string(),
                        Some(&format!("{processed} processed, {failed} failed")),
                    );
                    results.push(StageRunResult {
                        stage: kind,
                        status,
                        message: Some(summary),
                    });
                }
                Ok(StageOutcome::Skipped { reason }) => {
                    self.transition_stage(batch_id, kind, StageStatus::Skipped, Some(&reason))
                        .await?;
                    results.push(StageRunResult {
                        stage: kind,
                        status: StageStatus::Skipped,
                        message: Some(reason),
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    self.transition_stage(batch_id, kind, StageStatus::Error, Some(&message))
                        .await?;
                    let mut batch = require_batch(self.store.as_ref(), batch_id).await?;
                    batch.progress_message = Some(message.clone());
                    batch.updated_at = self.clock.now();
                    self.store.update_batch(&batch).await?;
                    log_stage_operation(
                        "stage_error",
                        batch_id,
                        &kind.to_string(),
                        "error",
                        Some(&message),
                    );
                    results.push(StageRunResult {
                        stage: kind,
                        status: StageStatus::Error,
                        message: Some(message),
                    });

                    if kind.is_hard_prerequisite() {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }

    /// Batch driver: marks the whole batch `processing`, runs the pipeline,
    /// and lands the batch in `completed` or `failed`. A cancellation that
    /// happened mid-run is left untouched.
    pub async fn run_batch(&self, batch_id: Uuid, toggles: &StageToggles) -> Result<Batch> {
        let mut batch = require_batch(self.store.as_ref(), batch_id).await?;
        if batch.status.can_transition_to(BatchStatus::Processing) {
            batch.status = BatchStatus::Processing;
            batch.updated_at = self.clock.now();
            self.store.update_batch(&batch).await?;
        }

        let run_result = self.run(batch_id, toggles).await;

        let mut batch = require_batch(self.store.as_ref(), batch_id).await?;
        if batch.status == BatchStatus::Cancelled {
            return Ok(batch);
        }
        match run_result {
            Ok(_) => {
                batch.status = BatchStatus::Completed;
                batch.current_step = None;
                batch.progress_message = Some("Enrichment pipeline completed".to_string());
                batch.updated_at = self.clock.now();
                self.store.update_batch(&batch).await?;
                Ok(batch)
            }
            Err(err) => {
                batch.status = BatchStatus::Failed;
                batch.progress_message = Some(err.to_string());
                batch.updated_at = self.clock.now();
                self.store.update_batch(&batch).await?;
                Err(err)
            }
        }
    }

    /// Cancel a batch: the batch row flips to `cancelled` and every
    /// non-terminal stage row follows. Idempotent when issued after
    /// completion.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<Batch> {
        let mut batch = require_batch(self.store.as_ref(), batch_id).await?;
        if batch.status.is_terminal() {
            return Ok(batch);
        }

        batch.status = BatchStatus::Cancelled;
        batch.progress_message = Some("cancelled by user".to_string());
        batch.updated_at = self.clock.now();
        self.store.update_batch(&batch).await?;

        for kind in StageKind::ordered() {
            let current = self
                .store
                .stage(batch_id, kind)
                .await?
                .unwrap_or_else(|| BatchStage::new(batch_id, kind));
            if !current.status.is_terminal() {
                self.transition_stage(batch_id, kind, StageStatus::Cancelled, Some("cancelled by user"))
                    .await?;
            }
        }
        Ok(batch)
    }

    /// Durably apply one stage-status transition, enforcing the forward-only
    /// state machine.
    async fn transition_stage(
        &self,
        batch_id: Uuid,
        kind: StageKind,
        next: StageStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let mut stage = self
            .store
            .stage(batch_id, kind)
            .await?
            .unwrap_or_else(|| BatchStage::new(batch_id, kind));

        if !stage.status.can_transition_to(next) {
            return Err(EnrichmentError::StateTransition(format!(
                "stage `{kind}` cannot move from `{}` to `{next}`",
                stage.status
            )));
        }

        let now = self.clock.now();
        stage.status = next;
        stage.message = message.map(str::to_string);
        if next == StageStatus::Processing {
            stage.started_at = Some(now);
        }
        if next.is_terminal() {
            stage.completed_at = Some(now);
        }
        self.store.upsert_stage(&stage).await?;

        log_stage_operation(
            "transition",
            batch_id,
            &kind.to_string(),
            &next.to_string(),
            message,
        );
        Ok(())
    }
}
