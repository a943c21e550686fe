//! # Asynchronous Search Coordinator and Worker
//!
//! Per-record external searches live as durable `SearchRequest` rows:
//! `pending → submitted → polling → {completed | failed | timeout | cancelled}`.
//! The coordinator owns every transition (submission, poll application,
//! webhook ingestion, retry-as-new-row, and cancellation), so the polling
//! worker and the webhook path cannot disagree. The worker is a fixed-interval
//! tick loop over the due rows; it shares no in-memory state with the
//! orchestrator, so either side restarting mid-flight resumes from the store.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SearchWorkerConfig;
use crate::error::{EnrichmentError, Result};
use crate::logging::log_search_operation;
use crate::models::{NewSearchRequest, SearchRequest};
use crate::orchestration::sub_batch_manager::recompute_job_status;
use crate::services::{AsyncSearchClient, PollOutcome};
use crate::state_machine::{SearchStatus, SubBatchStatus};
use crate::store::{require_search, EnrichmentStore, RecordStore};

/// Counters for one worker tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub polled: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub still_polling: usize,
}

/// Push-style terminal notification from an external service, the
/// alternative to polling. A webhook and a subsequent poll for the same
/// search must not double-apply the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub search_id: String,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// SearchCoordinator owns the full asynchronous-search lifecycle.
pub struct SearchCoordinator {
    store: Arc<dyn EnrichmentStore>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    clients: DashMap<String, Arc<dyn AsyncSearchClient>>,
    config: SearchWorkerConfig,
}

impl SearchCoordinator {
    pub fn new(
        store: Arc<dyn EnrichmentStore>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: SearchWorkerConfig,
    ) -> Self {
        Self {
            store,
            records,
            clock,
            clients: DashMap::new(),
            config,
        }
    }

    pub fn register_client(&self, client: Arc<dyn AsyncSearchClient>) {
        self.clients.insert(client.search_type().to_string(), client);
    }

    fn client_for(&self, search_type: &str) -> Result<Arc<dyn AsyncSearchClient>> {
        self.clients
            .get(search_type)
            .map(|c| c.clone())
            .ok_or_else(|| {
                EnrichmentError::Configuration(format!(
                    "no async search client registered for `{search_type}`"
                ))
            })
    }

    /// Create and submit a new search. The row is persisted before the
    /// external call, so a crash between the two leaves an auditable
    /// `pending` row rather than an untracked external search. A prior
    /// transient submission failure leaves such a row behind; re-submitting
    /// for the same record reuses it rather than stranding one never-polled
    /// row per attempt.
    pub async fn submit(&self, new: NewSearchRequest) -> Result<SearchRequest> {
        let client = self.client_for(&new.search_type)?;
        let pending = self
            .store
            .searches_for_batch(new.batch_id)
            .await?
            .into_iter()
            .find(|s| {
                s.status == SearchStatus::Pending
                    && s.record_id == new.record_id
                    && s.search_type == new.search_type
            });
        let mut search = match pending {
            Some(row) => row,
            None => {
                self.store
                    .create_search(new.into_search(self.clock.now()))
                    .await?
            }
        };

        match client.submit(search.request_payload.clone()).await {
            Ok(external_id) => {
                search.status = SearchStatus::Submitted;
                search.external_search_id = Some(external_id);
                search.submitted_at = Some(self.clock.now());
                self.store.update_search(&search).await?;
                log_search_operation(
                    "submit",
                    search.id,
                    search.external_search_id.as_deref(),
                    "submitted",
                    None,
                    None,
                );
                Ok(search)
            }
            Err(err) if err.is_transient() => {
                // Leave the row pending; the submitter's retry budget decides
                // whether to try again or fail the owning record.
                self.store.update_search(&search).await?;
                Err(err)
            }
            Err(err) => {
                search.status = SearchStatus::Failed;
                search.error = Some(err.to_string());
                search.completed_at = Some(self.clock.now());
                self.store.update_search(&search).await?;
                Err(err)
            }
        }
    }

    /// Poll every due search once and apply the resulting transitions.
    pub async fn poll_due(&self) -> Result<TickSummary> {
        let now = self.clock.now();
        let cutoff = now - self.config.poll_backoff();
        let due = self.store.due_searches(cutoff).await?;

        let mut summary = TickSummary::default();
        for search in due {
            summary.polled += 1;
            match self.poll_one(search).await? {
                SearchStatus::Completed => summary.completed += 1,
                SearchStatus::Failed => summary.failed += 1,
                SearchStatus::Timeout => summary.timed_out += 1,
                _ => summary.still_polling += 1,
            }
        }
        Ok(summary)
    }

    /// Issue one poll for the search and apply the transition. Returns the
    /// status the row ended the poll in.
    async fn poll_one(&self, search: SearchRequest) -> Result<SearchStatus> {
        // Reload: the row may have been cancelled or completed via webhook
        // since the due-list was selected.
        let mut search = require_search(self.store.as_ref(), search.id).await?;
        if !search.status.is_pollable() {
            return Ok(search.status);
        }

        let Some(external_id) = search.external_search_id.clone() else {
            return self
                .apply_failure(search.id, "submitted search has no external id", SearchStatus::Failed)
                .await;
        };
        let client = self.client_for(&search.search_type)?;

        search.status = SearchStatus::Polling;
        search.poll_attempts += 1;
        search.last_polled_at = Some(self.clock.now());

        match client.poll(&external_id).await {
            Ok(PollOutcome::Completed(result)) => {
                self.store.update_search(&search).await?;
                self.apply_completion(search.id, result).await
            }
            Ok(PollOutcome::Failed(reason)) => {
                self.store.update_search(&search).await?;
                self.apply_failure(search.id, &reason, SearchStatus::Failed)
                    .await
            }
            Ok(PollOutcome::Pending) => self.after_inconclusive_poll(search).await,
            // A failure of the poll call itself is transient by definition:
            // it spends one attempt but never terminates the search.
            Err(err) => {
                tracing::debug!(
                    search_id = %search.id,
                    error = %err,
                    "poll attempt failed; search stays polling"
                );
                self.after_inconclusive_poll(search).await
            }
        }
    }

    /// Persist a poll attempt that produced no terminal answer, forcing
    /// `timeout` once the attempt budget is exhausted.
    async fn after_inconclusive_poll(&self, search: SearchRequest) -> Result<SearchStatus> {
        if search.budget_exhausted() {
            self.store.update_search(&search).await?;
            return self
                .apply_failure(
                    search.id,
                    &format!(
                        "no terminal result after {} poll attempts",
                        search.poll_attempts
                    ),
                    SearchStatus::Timeout,
                )
                .await;
        }
        log_search_operation(
            "poll",
            search.id,
            search.external_search_id.as_deref(),
            "polling",
            Some(search.poll_attempts),
            None,
        );
        self.store.update_search(&search).await?;
        Ok(SearchStatus::Polling)
    }

    /// Apply a terminal success. Idempotent: an already-terminal row is left
    /// untouched, so a webhook and a poll can race without double-applying.
    pub async fn apply_completion(
        &self,
        search_id: Uuid,
        result: serde_json::Value,
    ) -> Result<SearchStatus> {
        let mut search = require_search(self.store.as_ref(), search_id).await?;
        if search.status.is_terminal() {
            return Ok(search.status);
        }

        search.status = SearchStatus::Completed;
        search.response_payload = Some(result.clone());
        search.completed_at = Some(self.clock.now());
        self.store.update_search(&search).await?;

        self.apply_result_to_record(&search, &result).await?;
        self.account_search_outcome(&search, true).await?;

        log_search_operation(
            "complete",
            search.id,
            search.external_search_id.as_deref(),
            "completed",
            Some(search.poll_attempts),
            None,
        );
        Ok(SearchStatus::Completed)
    }

    /// Apply a terminal failure or timeout. Idempotent like
    /// [`Self::apply_completion`].
    pub async fn apply_failure(
        &self,
        search_id: Uuid,
        reason: &str,
        terminal: SearchStatus,
    ) -> Result<SearchStatus> {
        debug_assert!(matches!(
            terminal,
            SearchStatus::Failed | SearchStatus::Timeout
        ));
        let mut search = require_search(self.store.as_ref(), search_id).await?;
        if search.status.is_terminal() {
            return Ok(search.status);
        }

        search.status = terminal;
        search.error = Some(reason.to_string());
        search.completed_at = Some(self.clock.now());
        self.store.update_search(&search).await?;

        if let Some(mut record) = self.records.record(search.record_id).await? {
            record.enrichment_error = Some(reason.to_string());
            self.records.update_record(&record).await?;
        }
        self.account_search_outcome(&search, false).await?;

        log_search_operation(
            "fail",
            search.id,
            search.external_search_id.as_deref(),
            &terminal.to_string(),
            Some(search.poll_attempts),
            Some(reason),
        );
        Ok(terminal)
    }

    /// Write the search result onto the owning payee record.
    async fn apply_result_to_record(
        &self,
        search: &SearchRequest,
        result: &serde_json::Value,
    ) -> Result<()> {
        let Some(mut record) = self.records.record(search.record_id).await? else {
            return Ok(());
        };
        if let Some(category) = result.get("merchant_category").and_then(|v| v.as_str()) {
            record.merchant_category = Some(category.to_string());
        }
        record.enrichment_error = None;
        self.records.update_record(&record).await
    }

    /// Roll a terminal search outcome up into its owning sub-batch and job.
    /// A cancelled sub-batch discards late-arriving results.
    async fn account_search_outcome(&self, search: &SearchRequest, success: bool) -> Result<()> {
        let Some(sub_batch_id) = search.sub_batch_id else {
            return Ok(());
        };
        let Some(mut sub) = self.store.sub_batch(sub_batch_id).await? else {
            return Ok(());
        };
        if sub.status != SubBatchStatus::Processing {
            return Ok(());
        }

        if success {
            sub.records_processed += 1;
        } else {
            sub.records_failed += 1;
        }
        if sub.is_fully_accounted() {
            sub.status = SubBatchStatus::Completed;
            sub.completed_at = Some(self.clock.now());
        }
        self.store.update_sub_batch(&sub).await?;

        if sub.status.is_terminal() {
            recompute_job_status(self.store.as_ref(), self.clock.as_ref(), sub.batch_job_id)
                .await?;
        }
        Ok(())
    }

    /// Retry a terminal `failed`/`timeout` search by submitting a brand-new
    /// request with the same payload. The original row is never mutated;
    /// history stays an immutable audit trail.
    pub async fn retry(&self, search_id: Uuid) -> Result<SearchRequest> {
        let original = require_search(self.store.as_ref(), search_id).await?;
        if !matches!(
            original.status,
            SearchStatus::Failed | SearchStatus::Timeout
        ) {
            return Err(EnrichmentError::Validation(format!(
                "search {search_id} is `{}`; only failed or timed-out searches can be retried",
                original.status
            )));
        }

        let client = self.client_for(&original.search_type)?;
        let mut retried = self
            .store
            .create_search(original.retry_from(self.clock.now()))
            .await?;
        let external_id = client.submit(retried.request_payload.clone()).await?;
        retried.status = SearchStatus::Submitted;
        retried.external_search_id = Some(external_id);
        retried.submitted_at = Some(self.clock.now());
        self.store.update_search(&retried).await?;

        log_search_operation(
            "retry",
            retried.id,
            retried.external_search_id.as_deref(),
            "submitted",
            None,
            Some(&format!("retry of {search_id}")),
        );
        Ok(retried)
    }

    /// Cancel a search: it is excluded from all future worker ticks, and a
    /// result from an already-issued external call is discarded on arrival.
    /// Idempotent after the search reached any terminal state.
    pub async fn cancel(&self, search_id: Uuid) -> Result<SearchRequest> {
        let mut search = require_search(self.store.as_ref(), search_id).await?;
        if search.status.is_terminal() {
            return Ok(search);
        }
        search.status = SearchStatus::Cancelled;
        search.completed_at = Some(self.clock.now());
        self.store.update_search(&search).await?;

        log_search_operation(
            "cancel",
            search.id,
            search.external_search_id.as_deref(),
            "cancelled",
            Some(search.poll_attempts),
            None,
        );
        Ok(search)
    }

    /// Ingest a push notification. On a terminal status this behaves exactly
    /// like a poll reaching the same terminal state; anything non-terminal
    /// is acknowledged and ignored.
    pub async fn ingest_webhook(&self, payload: WebhookPayload) -> Result<SearchRequest> {
        let search = self
            .store
            .search_by_external_id(&payload.search_id)
            .await?
            .ok_or_else(|| {
                EnrichmentError::NotFound(format!("search with external id {}", payload.search_id))
            })?;

        match payload.status.as_str() {
            "completed" => {
                let result = payload.result.unwrap_or(serde_json::Value::Null);
                self.apply_completion(search.id, result).await?;
            }
            "failed" => {
                let reason = payload
                    .error
                    .unwrap_or_else(|| "failure reported via webhook".to_string());
                self.apply_failure(search.id, &reason, SearchStatus::Failed)
                    .await?;
            }
            _ => {
                tracing::debug!(
                    search_id = %search.id,
                    status = %payload.status,
                    "ignoring non-terminal webhook status"
                );
            }
        }
        require_search(self.store.as_ref(), search.id).await
    }
}

/// Background loop that advances all outstanding searches on a fixed
/// interval. All state lives in the store; stopping and restarting the
/// worker loses nothing.
pub struct SearchWorker {
    coordinator: Arc<SearchCoordinator>,
    config: SearchWorkerConfig,
}

impl SearchWorker {
    pub fn new(coordinator: Arc<SearchCoordinator>, config: SearchWorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// One worker tick: poll every due search once.
    pub async fn tick(&self) -> Result<TickSummary> {
        self.coordinator.poll_due().await
    }

    /// Run ticks until the shutdown signal flips to `true`. Tick failures
    /// are logged and the loop continues; nothing here may crash the host.
    pub async fn run_until_shutdown(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(summary) if summary.polled > 0 => {
                            tracing::info!(
                                polled = summary.polled,
                                completed = summary.completed,
                                failed = summary.failed,
                                timed_out = summary.timed_out,
                                "🔎 SEARCH_WORKER: tick"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => {
                            crate::logging::log_error(
                                "search_worker",
                                "tick",
                                &err.to_string(),
                                None,
                            );
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("🔎 SEARCH_WORKER: shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the worker onto the runtime; returns the shutdown handle and
    /// the task handle.
    pub fn start(self: Arc<Self>) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run_until_shutdown(rx));
        (tx, handle)
    }
}
