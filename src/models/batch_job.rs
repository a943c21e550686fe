use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::BatchJobStatus;

/// BatchJob represents one (batch, stage) execution unit owning a set of
/// sub-batches. The ordered record-id snapshot taken at submission time keeps
/// chunk boundaries deterministic across resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// Service name of the owning stage (e.g. `supplier_match`).
    pub service: String,
    pub status: BatchJobStatus,
    pub total_records: i32,
    pub processed_records: i32,
    pub failed_records: i32,
    /// Ordered snapshot of the record ids this job covers.
    pub record_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(batch_id: Uuid, service: &str, record_ids: Vec<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            service: service.to_string(),
            status: BatchJobStatus::Pending,
            total_records: record_ids.len() as i32,
            processed_records: 0,
            failed_records: 0,
            record_ids,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Progress percentage derived from counts, clamped to [0, 100].
    pub fn progress_percent(&self) -> f64 {
        if self.total_records <= 0 {
            return 0.0;
        }
        let pct = f64::from(self.processed_records) / f64::from(self.total_records) * 100.0;
        pct.clamp(0.0, 100.0)
    }
}
