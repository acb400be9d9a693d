//! Job records exposed by the queue.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use churn_training::{TrainingJobId, TrainingJobSpec, TrainingManifest};
use serde::Serialize;

/// Lifecycle of a training job.
///
/// `queued -> running -> {succeeded, retry_scheduled, dead_lettered}`, and
/// `retry_scheduled -> queued` once the backoff delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    RetryScheduled,
    Succeeded,
    DeadLettered,
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::DeadLettered)
    }
}

/// Result of a successful training job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingSummary {
    pub model_id: String,
    pub accuracy: f64,
}

impl From<&TrainingManifest> for TrainingSummary {
    fn from(manifest: &TrainingManifest) -> Self {
        Self { model_id: manifest.model_id.clone(), accuracy: manifest.metrics.accuracy }
    }
}

/// Queue-side view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    #[serde(rename = "task_id")]
    pub job_id: TrainingJobId,
    pub dataset_path: PathBuf,
    pub state: JobState,
    /// Attempts started so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub result: Option<TrainingSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    #[must_use]
    pub fn queued(spec: &TrainingJobSpec, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            job_id: spec.job_id.clone(),
            dataset_path: spec.dataset_path.clone(),
            state: JobState::Queued,
            attempts: 0,
            max_attempts,
            last_error: None,
            next_attempt_at: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub spec: TrainingJobSpec,
    /// 1-based attempt number of this run.
    pub attempt: u32,
}

/// What the queue did with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-queued; `next_attempt` starts after `delay`.
    Retry { next_attempt: u32, delay: Duration },
    /// Attempts exhausted; the job stays failed.
    DeadLettered,
}
