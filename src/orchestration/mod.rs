//! # Orchestration Engine
//!
//! The job-orchestration and resumable-execution core:
//!
//! - **PipelineOrchestrator**: sequences enrichment stages over a batch and
//!   tracks per-stage status on the batch record
//! - **SubBatchManager**: splits a batch into bounded-size chunks, executes
//!   them under a per-service concurrency limit, and owns resume/cancel
//! - **SearchCoordinator / SearchWorker**: the asynchronous external-search
//!   state machine and the background loop that advances it
//!
//! The three components never share in-memory state; the durable store rows
//! are the only coordination channel, so any of them restarting mid-flight
//! resumes correctly by re-reading status.

pub mod pipeline;
pub mod search_worker;
pub mod sub_batch_manager;

pub use pipeline::{PipelineOrchestrator, StageRunResult};
pub use search_worker::{SearchCoordinator, SearchWorker, TickSummary, WebhookPayload};
pub use sub_batch_manager::{
    CancelOutcome, ChunkContext, RecordOutcome, RecordProcessor, SubBatchManager,
};
