//! # External Service Clients
//!
//! Collaborator contracts for the enrichment services. Each stage talks to
//! exactly one client: either a synchronous call-and-answer service or an
//! asynchronous submit-then-poll search service. Implementations map their
//! transport failures onto the engine's error taxonomy: network and
//! rate-limit problems become `TransientService`, explicit rejections
//! `TerminalService`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Synchronous enrichment service: one call, one result.
#[async_trait]
pub trait EnrichmentServiceClient: Send + Sync {
    fn service_name(&self) -> &str;

    async fn call(&self, input: Value) -> Result<Value>;
}

/// Result of polling an asynchronous search.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The service has not finished the search yet.
    Pending,
    /// Terminal success with the search result.
    Completed(Value),
    /// The service reported a terminal failure for the search itself.
    Failed(String),
}

/// Asynchronous search service: submit returns an external search id,
/// poll advances it toward a terminal outcome.
#[async_trait]
pub trait AsyncSearchClient: Send + Sync {
    fn search_type(&self) -> &str;

    async fn submit(&self, input: Value) -> Result<String>;

    async fn poll(&self, external_search_id: &str) -> Result<PollOutcome>;
}
