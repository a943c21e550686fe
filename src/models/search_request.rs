use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::SearchStatus;

/// SearchRequest represents one asynchronous external search lifecycle:
/// submit, poll until a terminal result, apply. Terminal rows are immutable;
/// retry always creates a new request so the history stays an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// The payee record this search enriches.
    pub record_id: Uuid,
    /// Owning sub-batch, when the search was registered by chunk execution.
    pub sub_batch_id: Option<Uuid>,
    /// Client-specific search kind (e.g. `merchant_match`).
    pub search_type: String,
    pub status: SearchStatus,
    /// Id issued by the external service at submission time.
    pub external_search_id: Option<String>,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub poll_attempts: i32,
    pub max_poll_attempts: i32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New SearchRequest for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSearchRequest {
    pub batch_id: Uuid,
    pub record_id: Uuid,
    pub sub_batch_id: Option<Uuid>,
    pub search_type: String,
    pub request_payload: serde_json::Value,
    pub max_poll_attempts: i32,
}

impl NewSearchRequest {
    pub fn into_search(self, now: DateTime<Utc>) -> SearchRequest {
        SearchRequest {
            id: Uuid::new_v4(),
            batch_id: self.batch_id,
            record_id: self.record_id,
            sub_batch_id: self.sub_batch_id,
            search_type: self.search_type,
            status: SearchStatus::Pending,
            external_search_id: None,
            request_payload: self.request_payload,
            response_payload: None,
            poll_attempts: 0,
            max_poll_attempts: self.max_poll_attempts,
            submitted_at: None,
            last_polled_at: None,
            completed_at: None,
            error: None,
            created_at: now,
        }
    }
}

impl SearchRequest {
    /// Whether the poll-attempt budget has been used up.
    pub fn budget_exhausted(&self) -> bool {
        self.poll_attempts >= self.max_poll_attempts
    }

    /// Fresh request carrying the same submission payload and ownership;
    /// the retry path for a terminal `failed`/`timeout` search.
    pub fn retry_from(&self, now: DateTime<Utc>) -> SearchRequest {
        NewSearchRequest {
            batch_id: self.batch_id,
            record_id: self.record_id,
            sub_batch_id: self.sub_batch_id,
            search_type: self.search_type.clone(),
            request_payload: self.request_payload.clone(),
            max_poll_attempts: self.max_poll_attempts,
        }
        .into_search(now)
    }
}
