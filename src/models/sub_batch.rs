use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::SubBatchStatus;

/// SubBatch represents one contiguous chunk `[start_index, end_index)` of a
/// batch job's record set. Sub-batches of the same job never overlap and
/// together cover the record set exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubBatch {
    pub id: Uuid,
    pub batch_job_id: Uuid,
    /// 1-based position of this chunk within the job.
    pub batch_number: i32,
    pub total_batches: i32,
    pub start_index: i32,
    pub end_index: i32,
    pub record_count: i32,
    pub status: SubBatchStatus,
    pub records_processed: i32,
    pub records_failed: i32,
    /// Incremented only by explicit resume of a failed chunk.
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubBatch {
    pub fn new(
        batch_job_id: Uuid,
        batch_number: i32,
        total_batches: i32,
        start_index: i32,
        end_index: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_job_id,
            batch_number,
            total_batches,
            start_index,
            end_index,
            record_count: end_index - start_index,
            status: SubBatchStatus::Pending,
            records_processed: 0,
            records_failed: 0,
            retry_count: 0,
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether every record in the chunk has a processed-or-failed outcome.
    pub fn is_fully_accounted(&self) -> bool {
        self.records_processed + self.records_failed >= self.record_count
    }
}
