//! In-process broker backed by a tokio channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use churn_training::{TrainingJobId, TrainingJobSpec};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{
    FailureDisposition, JobQueue, JobRecord, JobState, QueueError, QueueResult, QueuedJob, RetryPolicy,
    TrainingSummary,
};

struct Entry {
    spec: TrainingJobSpec,
    record: JobRecord,
}

struct Inner {
    sender: mpsc::UnboundedSender<TrainingJobId>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<TrainingJobId>>,
    entries: Mutex<HashMap<TrainingJobId, Entry>>,
    policy: RetryPolicy,
    shutdown: watch::Sender<bool>,
}

/// Job queue living inside the server process.
///
/// Job ids travel over an unbounded channel; the records table holds state.
/// Retries are re-sent on the channel by a timer task after the backoff delay.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    inner: Arc<Inner>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                entries: Mutex::new(HashMap::new()),
                policy,
                shutdown,
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    fn entries(&self) -> QueueResult<MutexGuard<'_, HashMap<TrainingJobId, Entry>>> {
        self.inner.entries.lock().map_err(|_| QueueError::Poisoned)
    }

    fn with_running<T>(
        &self,
        job_id: &TrainingJobId,
        f: impl FnOnce(&mut Entry) -> T,
    ) -> QueueResult<T> {
        let mut entries = self.entries()?;
        let entry = entries.get_mut(job_id).ok_or_else(|| QueueError::NotFound(job_id.clone()))?;
        if entry.record.state != JobState::Running {
            return Err(QueueError::InvalidState {
                job_id: job_id.clone(),
                state: entry.record.state,
                expected: JobState::Running,
            });
        }
        entry.record.updated_at = Utc::now();
        Ok(f(entry))
    }

    /// Move a delivered id to `running`; stale deliveries yield `None`.
    fn start_attempt(&self, job_id: &TrainingJobId) -> QueueResult<Option<QueuedJob>> {
        let mut entries = self.entries()?;
        let Some(entry) = entries.get_mut(job_id) else {
            return Ok(None);
        };
        if entry.record.state != JobState::Queued {
            return Ok(None);
        }
        entry.record.state = JobState::Running;
        entry.record.attempts += 1;
        entry.record.next_attempt_at = None;
        entry.record.updated_at = Utc::now();
        Ok(Some(QueuedJob { spec: entry.spec.clone(), attempt: entry.record.attempts }))
    }

    fn requeue(&self, job_id: &TrainingJobId) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        {
            let mut entries = self.entries()?;
            let Some(entry) = entries.get_mut(job_id) else {
                return Ok(());
            };
            if entry.record.state != JobState::RetryScheduled {
                return Ok(());
            }
            entry.record.state = JobState::Queued;
            entry.record.updated_at = Utc::now();
        }
        self.inner.sender.send(job_id.clone()).map_err(|_| QueueError::Closed)
    }

    fn schedule_retry(&self, job_id: TrainingJobId, delay: std::time::Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.requeue(&job_id) {
                debug!(job_id = %job_id, error = %e, "Dropped scheduled retry");
            }
        });
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, spec: TrainingJobSpec) -> QueueResult<TrainingJobId> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let job_id = spec.job_id.clone();
        {
            let mut entries = self.entries()?;
            let record = JobRecord::queued(&spec, self.inner.policy.max_attempts);
            entries.insert(job_id.clone(), Entry { spec, record });
        }
        self.inner.sender.send(job_id.clone()).map_err(|_| QueueError::Closed)?;
        debug!(job_id = %job_id, "Enqueued training job");
        Ok(job_id)
    }

    async fn status(&self, job_id: &TrainingJobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.entries()?.get(job_id).map(|entry| entry.record.clone()))
    }

    async fn dequeue(&self) -> QueueResult<Option<QueuedJob>> {
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut receiver = self.inner.receiver.lock().await;

        loop {
            if *shutdown.borrow_and_update() {
                return Ok(None);
            }
            let job_id = tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(None),
                received = receiver.recv() => match received {
                    Some(job_id) => job_id,
                    None => return Ok(None),
                },
            };
            if let Some(job) = self.start_attempt(&job_id)? {
                return Ok(Some(job));
            }
        }
    }

    async fn complete(&self, job_id: &TrainingJobId, summary: TrainingSummary) -> QueueResult<()> {
        self.with_running(job_id, |entry| {
            entry.record.state = JobState::Succeeded;
            entry.record.result = Some(summary);
        })
    }

    async fn fail(&self, job_id: &TrainingJobId, error: String) -> QueueResult<FailureDisposition> {
        let policy = &self.inner.policy;
        let disposition = self.with_running(job_id, |entry| {
            let record = &mut entry.record;
            record.last_error = Some(error);
            if policy.should_retry(record.attempts) {
                let delay = policy.calculate_delay(record.attempts - 1);
                record.state = JobState::RetryScheduled;
                let now = record.updated_at;
                record.next_attempt_at = chrono::Duration::from_std(delay).ok().map(|d| now + d);
                FailureDisposition::Retry { next_attempt: record.attempts + 1, delay }
            } else {
                record.state = JobState::DeadLettered;
                FailureDisposition::DeadLettered
            }
        })?;

        if let FailureDisposition::Retry { delay, .. } = &disposition {
            self.schedule_retry(job_id.clone(), *delay);
        }
        Ok(disposition)
    }

    fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }
}
