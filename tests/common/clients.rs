//! Scripted stand-ins for the external enrichment and search services.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use enrichment_core::error::{EnrichmentError, Result};
use enrichment_core::services::{AsyncSearchClient, EnrichmentServiceClient, PollOutcome};

/// Synchronous service whose behavior is a closure over the request payload.
pub struct ScriptedService {
    name: String,
    handler: Box<dyn Fn(Value) -> Result<Value> + Send + Sync>,
}

impl ScriptedService {
    pub fn new(
        name: &str,
        handler: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            handler: Box::new(handler),
        })
    }

    /// Service that is down: every call is a transient failure.
    pub fn unavailable(name: &str) -> Arc<Self> {
        Self::new(name, |_| {
            Err(EnrichmentError::TransientService(
                "service unavailable".into(),
            ))
        })
    }
}

#[async_trait]
impl EnrichmentServiceClient for ScriptedService {
    fn service_name(&self) -> &str {
        &self.name
    }

    async fn call(&self, input: Value) -> Result<Value> {
        (self.handler)(input)
    }
}

enum SubmitMode {
    Succeed,
    FailTransient,
    FailTerminal,
}

/// Asynchronous search service issuing deterministic external ids
/// (`ext-1`, `ext-2`, ...) with per-id scripted poll outcomes. An
/// unscripted poll answers `Pending`.
pub struct ScriptedSearchClient {
    search_type: String,
    submissions: AtomicUsize,
    polls: Mutex<HashMap<String, VecDeque<PollOutcome>>>,
    submit_mode: Mutex<SubmitMode>,
}

impl ScriptedSearchClient {
    pub fn new(search_type: &str) -> Arc<Self> {
        Arc::new(Self {
            search_type: search_type.to_string(),
            submissions: AtomicUsize::new(0),
            polls: Mutex::new(HashMap::new()),
            submit_mode: Mutex::new(SubmitMode::Succeed),
        })
    }

    pub fn script_poll(&self, external_id: &str, outcomes: Vec<PollOutcome>) {
        self.polls
            .lock()
            .insert(external_id.to_string(), outcomes.into());
    }

    pub fn fail_submissions_transient(&self) {
        *self.submit_mode.lock() = SubmitMode::FailTransient;
    }

    pub fn fail_submissions_terminal(&self) {
        *self.submit_mode.lock() = SubmitMode::FailTerminal;
    }

    /// Back to the default: submissions succeed again.
    pub fn succeed_submissions(&self) {
        *self.submit_mode.lock() = SubmitMode::Succeed;
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AsyncSearchClient for ScriptedSearchClient {
    fn search_type(&self) -> &str {
        &self.search_type
    }

    async fn submit(&self, _input: Value) -> Result<String> {
        match *self.submit_mode.lock() {
            SubmitMode::FailTransient => Err(EnrichmentError::TransientService(
                "search service unavailable".into(),
            )),
            SubmitMode::FailTerminal => {
                Err(EnrichmentError::TerminalService("search rejected".into()))
            }
            SubmitMode::Succeed => {
                let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("ext-{n}"))
            }
        }
    }

    async fn poll(&self, external_search_id: &str) -> Result<PollOutcome> {
        Ok(self
            .polls
            .lock()
            .get_mut(external_search_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(PollOutcome::Pending))
    }
}
