//! # Error Handling
//!
//! Structured error taxonomy for the enrichment engine. Failures are split by
//! how the engine reacts to them: validation errors surface immediately,
//! transient service errors are retried against a budget, terminal service
//! errors are recorded on the owning row, and exhausted poll budgets become a
//! distinct `timeout` outcome so operators can tell "service said no" apart
//! from "service never answered".

use thiserror::Error;

/// Errors produced by the enrichment engine and its collaborators.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// Bad input to an operation. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or rate-limit failure while talking to an external service.
    /// Retryable against the owning stage's retry/poll budget.
    #[error("Transient service error: {0}")]
    TransientService(String),

    /// The external service explicitly reported a failure. Recorded on the
    /// owning sub-batch or search request; never aborts siblings.
    #[error("Terminal service error: {0}")]
    TerminalService(String),

    /// A poll-attempt budget was exhausted without a terminal result.
    #[error("Poll budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Durable store failure (database or in-memory backend).
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid or unloadable configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An illegal status transition was attempted.
    #[error("State transition error: {0}")]
    StateTransition(String),
}

impl EnrichmentError {
    /// Whether the failure is worth retrying within a retry/poll budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }
}

impl From<sqlx::Error> for EnrichmentError {
    fn from(err: sqlx::Error) -> Self {
        EnrichmentError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EnrichmentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EnrichmentError::TransientService("rate limited".into()).is_transient());
        assert!(!EnrichmentError::TerminalService("no match".into()).is_transient());
        assert!(!EnrichmentError::Validation("bad id".into()).is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = EnrichmentError::BudgetExceeded("search abc-123".into());
        assert_eq!(err.to_string(), "Poll budget exceeded: search abc-123");
    }
}
