//! # State Machine Module
//!
//! Status taxonomies for every engine-owned entity: batches, per-stage
//! progress, batch jobs, sub-batches, and asynchronous searches. Each enum
//! carries its own transition guard so illegal regressions (e.g., a completed
//! stage re-entering `processing`) are rejected before they reach the store.

pub mod states;

pub use states::{BatchJobStatus, BatchStatus, SearchStatus, StageStatus, SubBatchStatus};
