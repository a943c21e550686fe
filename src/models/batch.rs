use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stages::StageKind;
use crate::state_machine::{BatchStatus, StageStatus};

/// Batch represents one uploaded payee dataset and its enrichment lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub label: String,
    pub status: BatchStatus,
    pub total_records: i32,
    pub processed_records: i32,
    pub failed_records: i32,
    /// Human-readable label of the step currently running.
    pub current_step: Option<String>,
    /// Plain-text progress summary for the monitoring UI.
    pub progress_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Batch for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub label: String,
    pub total_records: i32,
}

impl NewBatch {
    pub fn into_batch(self, now: DateTime<Utc>) -> Batch {
        Batch {
            id: Uuid::new_v4(),
            label: self.label,
            status: BatchStatus::Pending,
            total_records: self.total_records,
            processed_records: 0,
            failed_records: 0,
            current_step: None,
            progress_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-stage progress tracked on the batch, one row per (batch, stage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStage {
    pub batch_id: Uuid,
    pub stage: StageKind,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Completion summary or error message for this stage.
    pub message: Option<String>,
}

impl BatchStage {
    pub fn new(batch_id: Uuid, stage: StageKind) -> Self {
        Self {
            batch_id,
            stage,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_batch_starts_pending() {
        let batch = NewBatch {
            label: "august payees".into(),
            total_records: 25,
        }
        .into_batch(Utc::now());
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.processed_records, 0);
        assert_eq!(batch.total_records, 25);
    }

    #[test]
    fn test_stage_row_defaults() {
        let stage = BatchStage::new(Uuid::new_v4(), StageKind::Classification);
        assert_eq!(stage.status, StageStatus::Pending);
        assert!(stage.started_at.is_none());
    }
}
