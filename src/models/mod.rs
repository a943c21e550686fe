//! # Data Model
//!
//! Engine-owned entities and their creation structs. Ownership is by foreign
//! key only: a Batch owns BatchJobs, a BatchJob owns SubBatches, and a
//! record's searches point back at their sub-batch. The worker and the
//! orchestrator run on different ticks and always reload state from the
//! store rather than sharing these structs in memory.

pub mod batch;
pub mod batch_job;
pub mod payee_record;
pub mod search_request;
pub mod sub_batch;

pub use batch::{Batch, BatchStage, NewBatch};
pub use batch_job::BatchJob;
pub use payee_record::{PayeeRecord, PayeeType, SupplierMatch};
pub use search_request::{NewSearchRequest, SearchRequest};
pub use sub_batch::SubBatch;
