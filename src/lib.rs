#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Enrichment Core
//!
//! Job-orchestration and resumable-execution engine for payee data
//! enrichment pipelines.
//!
//! ## Overview
//!
//! A batch of payee records is run through a fixed sequence of enrichment
//! stages (identity classification, supplier-network matching, address
//! validation, merchant matching, payment-method prediction), each backed by
//! a different external service with its own latency, rate limits, and
//! failure modes. This crate owns the machinery that keeps those runs
//! resumable and honestly accounted:
//!
//! - **Pipeline orchestration**: per-stage status on the batch record,
//!   durable transition writes, failure isolation between stages
//! - **Batch/sub-batch decomposition**: bounded-size chunks with per-chunk
//!   progress, retry, resume-from-failure, and cooperative cancellation
//! - **Asynchronous search state machine**: submit/poll lifecycles with a
//!   bounded poll budget, a background worker loop, and webhook ingestion
//!   idempotent against polling
//!
//! ## Module Organization
//!
//! - [`models`] - Engine-owned entities (Batch, BatchJob, SubBatch, SearchRequest)
//! - [`state_machine`] - Status taxonomies and transition guards
//! - [`store`] - Durable store trait with Postgres and in-memory backends
//! - [`stages`] - The five stage modules and their uniform contract
//! - [`orchestration`] - Orchestrator, sub-batch manager, search worker
//! - [`monitor`] - Views and corrective actions for monitoring collaborators
//! - [`services`] - External service client contracts
//! - [`config`] - Typed configuration with file/env loading
//! - [`error`] - Structured error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use enrichment_core::clock::SystemClock;
//! use enrichment_core::config::EnrichmentConfig;
//! use enrichment_core::orchestration::{SearchCoordinator, SearchWorker};
//! use enrichment_core::store::{MemoryRecordStore, MemoryStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EnrichmentConfig::load()?;
//! let store = Arc::new(MemoryStore::new());
//! let records = Arc::new(MemoryRecordStore::new());
//! let clock = Arc::new(SystemClock);
//!
//! let coordinator = Arc::new(SearchCoordinator::new(
//!     store,
//!     records,
//!     clock,
//!     config.search.clone(),
//! ));
//! let worker = Arc::new(SearchWorker::new(coordinator, config.search));
//! // worker.start() spawns the polling loop onto the runtime.
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod orchestration;
pub mod services;
pub mod stages;
pub mod state_machine;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BatchingConfig, DatabaseConfig, EnrichmentConfig, SearchWorkerConfig, StageToggles};
pub use error::{EnrichmentError, Result};
pub use models::{Batch, BatchJob, BatchStage, NewBatch, NewSearchRequest, PayeeRecord, SearchRequest, SubBatch};
pub use monitor::{BatchJobView, CancelResponse, MonitoringService, ResumeResponse, SubBatchSummary};
pub use orchestration::{
    CancelOutcome, ChunkContext, PipelineOrchestrator, RecordOutcome, RecordProcessor,
    SearchCoordinator, SearchWorker, SubBatchManager, TickSummary, WebhookPayload,
};
pub use stages::{StageKind, StageModule, StageOutcome};
pub use state_machine::{BatchJobStatus, BatchStatus, SearchStatus, StageStatus, SubBatchStatus};
pub use store::{EnrichmentStore, MemoryRecordStore, MemoryStore, PgStore, RecordStore};
