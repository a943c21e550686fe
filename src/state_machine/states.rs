use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole-batch lifecycle status, owned by the batch driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Initial state when the batch is created
    #[default]
    Pending,
    /// The pipeline is running over the batch
    Processing,
    /// Every enabled stage finished
    Completed,
    /// A stage error propagated to the batch driver
    Failed,
    /// The batch was cancelled by the user
    Cancelled,
}

impl BatchStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        if *self == next {
            return false;
        }
        match (*self, next) {
            (_, Self::Cancelled) => !self.is_terminal(),
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}

/// Per-stage status tracked on the batch record, one value per stage.
///
/// Transitions are forward-only (`pending → processing → terminal`) except
/// `cancelled`, which is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started yet
    #[default]
    Pending,
    /// Stage is currently executing
    Processing,
    /// Stage finished and produced results
    Completed,
    /// Stage finished but some records failed
    Failed,
    /// Stage had nothing to do (disabled, or zero eligible records)
    Skipped,
    /// Stage was cancelled along with its batch
    Cancelled,
    /// Stage raised an unrecoverable error
    Error,
}

impl StageStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled | Self::Error
        )
    }

    /// Check if the stage is actively running
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Check whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        if *self == next {
            return false;
        }
        match (*self, next) {
            (_, Self::Cancelled) => !self.is_terminal(),
            (Self::Pending, Self::Processing | Self::Skipped) => true,
            (Self::Processing, Self::Completed | Self::Failed | Self::Skipped | Self::Error) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid stage status: {s}")),
        }
    }
}

/// Status of one (batch, stage) execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    /// Job created, no sub-batch started yet
    #[default]
    Pending,
    /// At least one sub-batch is not yet terminal
    Processing,
    /// Every sub-batch completed
    Completed,
    /// Every sub-batch is terminal and none completed
    Failed,
    /// Mix of completed and terminal-failed sub-batches, none still active
    Partial,
    /// Job was cancelled by the user
    Cancelled,
}

impl BatchJobStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Partial | Self::Cancelled
        )
    }

    /// Derive the aggregate job status from its sub-batch statuses.
    ///
    /// Pure function: the rule table depends on nothing but the given vector.
    pub fn derive(sub_statuses: &[SubBatchStatus]) -> BatchJobStatus {
        if sub_statuses.is_empty() {
            return Self::Pending;
        }
        if sub_statuses.iter().all(|s| *s == SubBatchStatus::Pending) {
            return Self::Pending;
        }
        if sub_statuses.iter().any(|s| !s.is_terminal()) {
            return Self::Processing;
        }
        // All terminal from here on.
        if sub_statuses.iter().all(|s| *s == SubBatchStatus::Completed) {
            return Self::Completed;
        }
        if sub_statuses.iter().any(|s| *s == SubBatchStatus::Cancelled) {
            return Self::Cancelled;
        }
        if sub_statuses.iter().any(|s| *s == SubBatchStatus::Completed) {
            Self::Partial
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Partial => write!(f, "partial"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for BatchJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid batch job status: {s}")),
        }
    }
}

/// Status of one bounded chunk of a batch job's record set.
///
/// `cancelled` is a first-class value rather than a repurposed `failed`, so
/// operator-initiated cancellation stays distinguishable from real failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubBatchStatus {
    /// Chunk not yet handed to the stage module
    #[default]
    Pending,
    /// Chunk execution in flight
    Processing,
    /// Every record in the chunk is accounted for
    Completed,
    /// Chunk aborted; eligible for resume
    Failed,
    /// Chunk cancelled by the user
    Cancelled,
}

impl SubBatchStatus {
    /// Check if this is a terminal state (resume is the only way out)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check whether moving to `next` is a legal transition.
    ///
    /// `Failed → Pending` is the explicit resume path and the only
    /// backward edge in the machine.
    pub fn can_transition_to(&self, next: SubBatchStatus) -> bool {
        if *self == next {
            return false;
        }
        match (*self, next) {
            (Self::Pending | Self::Processing, Self::Cancelled) => true,
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, Self::Completed | Self::Failed) => true,
            (Self::Failed, Self::Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SubBatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for SubBatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid sub-batch status: {s}")),
        }
    }
}

/// Lifecycle of one asynchronous external search.
///
/// Monotonic toward a terminal value; a terminal search is immutable and
/// retry always creates a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// Created locally, not yet submitted to the external service
    #[default]
    Pending,
    /// Submission succeeded; external search id assigned
    Submitted,
    /// At least one poll attempt has been made
    Polling,
    /// External service reported terminal success
    Completed,
    /// External service reported terminal failure
    Failed,
    /// Poll-attempt budget exhausted without a terminal result
    Timeout,
    /// Cancelled by the user before reaching a terminal result
    Cancelled,
}

impl SearchStatus {
    /// Check if this is a terminal state (retry creates a new request)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// Check if the worker should still consider the search on its ticks
    pub fn is_pollable(&self) -> bool {
        matches!(self, Self::Submitted | Self::Polling)
    }

    /// Check whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: SearchStatus) -> bool {
        if *self == next {
            return false;
        }
        match (*self, next) {
            (_, Self::Cancelled) => !self.is_terminal(),
            (Self::Pending, Self::Submitted | Self::Failed) => true,
            // A webhook may land a terminal result before the first poll.
            (Self::Submitted, Self::Polling | Self::Completed | Self::Failed | Self::Timeout) => {
                true
            }
            (Self::Polling, Self::Completed | Self::Failed | Self::Timeout) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Submitted => write!(f, "submitted"),
            Self::Polling => write!(f, "polling"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for SearchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "polling" => Ok(Self::Polling),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid search status: {s}")),
        }
    }
}
