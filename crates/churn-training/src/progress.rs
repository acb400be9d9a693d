use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    Message { job_id: TrainingJobId, message: String },
    Evaluated { job_id: TrainingJobId, accuracy: f64 },
    Finished { job_id: TrainingJobId, model_id: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing` at info level.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => info!(job_id = %job_id, "Training started"),
            ProgressEvent::Message { job_id, message } => info!(job_id = %job_id, "{message}"),
            ProgressEvent::Evaluated { job_id, accuracy } => {
                info!(job_id = %job_id, accuracy, "Evaluated on held-out split");
            }
            ProgressEvent::Finished { job_id, model_id } => {
                info!(job_id = %job_id, model_id = %model_id, "Training finished");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}
