//! Training worker pool.
//!
//! Each worker pulls jobs from the [`JobQueue`], runs the [`Trainer`] and
//! reports the outcome back to the queue, which owns the retry decision.

use std::sync::Arc;

use churn_training::{ProgressSink, Trainer};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::queue::{FailureDisposition, JobQueue, QueuedJob, TrainingSummary};

/// A set of worker tasks sharing one queue.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    pub fn spawn(
        workers: usize,
        queue: Arc<dyn JobQueue>,
        trainer: Arc<dyn Trainer>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let handles = (0..workers)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let trainer = Arc::clone(&trainer);
                let progress = Arc::clone(&progress);
                tokio::spawn(async move { run_worker(worker_id, queue, trainer, progress).await })
            })
            .collect();
        Self { queue, handles }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.queue.close();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Training worker task failed");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    trainer: Arc<dyn Trainer>,
    progress: Arc<dyn ProgressSink>,
) {
    info!(worker_id, trainer = trainer.id(), "Training worker started");
    loop {
        let job = match queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(e) => {
                error!(worker_id, error = %e, "Failed to dequeue training job");
                break;
            }
        };
        process_job(queue.as_ref(), trainer.as_ref(), Arc::clone(&progress), job).await;
    }
    info!(worker_id, "Training worker stopped");
}

/// Run one attempt of a job and record its outcome.
pub async fn process_job(
    queue: &dyn JobQueue,
    trainer: &dyn Trainer,
    progress: Arc<dyn ProgressSink>,
    job: QueuedJob,
) {
    let job_id = job.spec.job_id.clone();
    info!(
        job_id = %job_id,
        attempt = job.attempt,
        dataset = %job.spec.dataset_path.display(),
        "Received training job"
    );

    match trainer.run(&job.spec, progress).await {
        Ok(manifest) => {
            info!(
                job_id = %job_id,
                model_id = %manifest.model_id,
                accuracy = manifest.metrics.accuracy,
                "Training succeeded"
            );
            if let Err(e) = queue.complete(&job_id, TrainingSummary::from(&manifest)).await {
                error!(job_id = %job_id, error = %e, "Failed to record training result");
            }
        }
        Err(e) => {
            warn!(
                job_id = %job_id,
                attempt = job.attempt,
                data_error = e.is_data_error(),
                error = %e,
                "Training failed"
            );
            match queue.fail(&job_id, e.to_string()).await {
                Ok(FailureDisposition::Retry { next_attempt, delay }) => {
                    info!(job_id = %job_id, next_attempt, delay_ms = delay.as_millis(), "Retry scheduled");
                }
                Ok(FailureDisposition::DeadLettered) => {
                    error!(job_id = %job_id, attempts = job.attempt, error = %e, "Training job dead-lettered");
                }
                Err(qe) => error!(job_id = %job_id, error = %qe, "Failed to record training failure"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobQueue, JobState, RetryPolicy};
    use async_trait::async_trait;
    use churn_training::{
        NoopProgressSink, TrainingError, TrainingJobSpec, TrainingManifest, TrainingResult,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails every run and counts them.
    struct FlakyTrainer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Trainer for FlakyTrainer {
        fn id(&self) -> &'static str {
            "flaky"
        }

        async fn run(&self, _job: &TrainingJobSpec, _progress: Arc<dyn ProgressSink>) -> TrainingResult<TrainingManifest> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(TrainingError::Data(format!("attempt {n} failed")))
        }
    }

    async fn wait_for_state(queue: &InMemoryJobQueue, job: &churn_training::TrainingJobId, state: JobState) {
        for _ in 0..200 {
            if queue.status(job).await.unwrap().map(|r| r.state) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {state:?}");
    }

    #[tokio::test]
    async fn test_failing_job_is_retried_then_dead_lettered() {
        let queue = InMemoryJobQueue::new(RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20), 2.0));
        let trainer = Arc::new(FlakyTrainer { calls: AtomicU32::new(0) });
        let pool = WorkerPool::spawn(1, Arc::new(queue.clone()), trainer.clone(), Arc::new(NoopProgressSink));

        let job_id = queue.enqueue(TrainingJobSpec::new(PathBuf::from("missing.csv"))).await.unwrap();
        wait_for_state(&queue, &job_id, JobState::DeadLettered).await;

        let record = queue.status(&job_id).await.unwrap().unwrap();
        assert_eq!(record.attempts, 3);
        assert_eq!(record.last_error.as_deref(), Some("data error: attempt 3 failed"));
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 3);

        assert_eq!(pool.size(), 1);
        tokio::time::timeout(Duration::from_secs(2), pool.shutdown()).await.unwrap();
    }
}
