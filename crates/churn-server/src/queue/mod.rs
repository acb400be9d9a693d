//! Training job queue.
//!
//! The API only talks to [`JobQueue`]; workers consume from the same trait.
//! [`InMemoryJobQueue`] is the in-process broker.

mod memory;
mod retry;
mod types;

pub use memory::InMemoryJobQueue;
pub use retry::RetryPolicy;
pub use types::{FailureDisposition, JobRecord, JobState, QueuedJob, TrainingSummary};

use async_trait::async_trait;
use churn_training::{TrainingJobId, TrainingJobSpec};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(TrainingJobId),

    #[error("job {job_id} is {state:?}, expected {expected:?}")]
    InvalidState { job_id: TrainingJobId, state: JobState, expected: JobState },

    #[error("queue is closed")]
    Closed,

    #[error("queue state lock poisoned")]
    Poisoned,
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Record a new job and hand it to the broker. Returns immediately.
    async fn enqueue(&self, spec: TrainingJobSpec) -> QueueResult<TrainingJobId>;

    async fn status(&self, job_id: &TrainingJobId) -> QueueResult<Option<JobRecord>>;

    /// Result of a succeeded job; `None` while pending or after dead-lettering.
    async fn result(&self, job_id: &TrainingJobId) -> QueueResult<Option<TrainingSummary>> {
        Ok(self.status(job_id).await?.and_then(|record| record.result))
    }

    /// Wait for the next job and mark it running. `None` once the queue is closed.
    async fn dequeue(&self) -> QueueResult<Option<QueuedJob>>;

    async fn complete(&self, job_id: &TrainingJobId, summary: TrainingSummary) -> QueueResult<()>;

    /// Record a failed attempt; the queue decides between retry and dead letter.
    async fn fail(&self, job_id: &TrainingJobId, error: String) -> QueueResult<FailureDisposition>;

    /// Stop handing out jobs. Pending retries are dropped.
    fn close(&self);
}
