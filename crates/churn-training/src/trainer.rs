use crate::artifacts::{TrainingManifest, TrainingMetrics};
use crate::dataset::{compute_dataset_id, load_csv, train_test_split, validate_labels};
use crate::error::{TrainingError, TrainingResult};
use crate::forest::RandomForest;
use crate::job::TrainingJobSpec;
use crate::model::ChurnModel;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::ModelRegistry;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Train on the job's dataset and publish the result.
    async fn run(&self, job: &TrainingJobSpec, progress: Arc<dyn ProgressSink>) -> TrainingResult<TrainingManifest>;
}

/// Fits a [`RandomForest`] and publishes it to a [`ModelRegistry`].
#[derive(Debug, Clone)]
pub struct ForestTrainer {
    registry: ModelRegistry,
}

impl ForestTrainer {
    #[must_use]
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Synchronous training pipeline: load, validate, split, fit, evaluate, publish.
    pub fn train_blocking(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingManifest> {
        job.validate()?;
        let job_id = job.job_id.clone();
        progress.on_event(ProgressEvent::Started { job_id: job_id.clone() });

        let dataset = load_csv(&job.dataset_path)?;
        progress.on_event(ProgressEvent::Message {
            job_id: job_id.clone(),
            message: format!("loaded {} rows from {}", dataset.len(), job.dataset_path.display()),
        });
        validate_labels(&dataset)?;

        let hp = &job.hyperparams;
        let (train, test) = train_test_split(&dataset, hp.test_ratio, hp.seed)?;
        let forest = RandomForest::fit(&train, &hp.forest_params())?;

        let accuracy = forest.accuracy(&test);
        progress.on_event(ProgressEvent::Evaluated { job_id: job_id.clone(), accuracy });

        let manifest = TrainingManifest {
            model_id: job_id.0.clone(),
            job_id: job_id.clone(),
            created_at: chrono::Utc::now(),
            dataset_path: job.dataset_path.clone(),
            dataset_id: compute_dataset_id(&job.dataset_path)?,
            hyperparams: hp.clone(),
            metrics: TrainingMetrics { accuracy, train_rows: train.len(), test_rows: test.len() },
            artifacts: Vec::new(),
        };
        let manifest = self.registry.publish(&ChurnModel::new(forest), manifest)?;

        progress.on_event(ProgressEvent::Finished { job_id, model_id: manifest.model_id.clone() });
        Ok(manifest)
    }
}

#[async_trait]
impl Trainer for ForestTrainer {
    fn id(&self) -> &'static str {
        "random-forest"
    }

    async fn run(&self, job: &TrainingJobSpec, progress: Arc<dyn ProgressSink>) -> TrainingResult<TrainingManifest> {
        let trainer = self.clone();
        let job = job.clone();
        tokio::task::spawn_blocking(move || trainer.train_blocking(&job, progress.as_ref()))
            .await
            .map_err(|e| TrainingError::Trainer(format!("training task panicked or was cancelled: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgressSink;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for RecordingSink {
        fn on_event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn write_csv(dir: &TempDir, name: &str, rows: usize) -> PathBuf {
        let mut csv = String::from("tenure,usage_freq,complaints,churn\n");
        for i in 0..rows {
            let churn = i % 2;
            let (tenure, complaints) = if churn == 1 { (i % 5, 4 + i % 3) } else { (20 + i % 30, i % 2) };
            csv.push_str(&format!("{tenure},{},{complaints},{churn}\n", 1 + i % 7));
        }
        let path = dir.path().join(name);
        std::fs::write(&path, csv).unwrap();
        path
    }

    #[test]
    fn test_train_blocking_publishes_model_and_reports_progress() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        let trainer = ForestTrainer::new(registry.clone());
        let job = TrainingJobSpec::new(write_csv(&temp, "data.csv", 50));
        let sink = RecordingSink::default();

        let manifest = trainer.train_blocking(&job, &sink).unwrap();
        assert_eq!(manifest.model_id, job.job_id.0);
        assert_eq!(manifest.metrics.test_rows, 10);
        assert_eq!(manifest.metrics.train_rows, 40);
        assert!((0.0..=1.0).contains(&manifest.metrics.accuracy));
        assert_eq!(registry.latest_id().unwrap(), Some(job.job_id.0.clone()));

        let events = sink.0.lock().unwrap();
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
    }

    #[test]
    fn test_train_blocking_fails_on_missing_file() {
        let temp = TempDir::new().unwrap();
        let trainer = ForestTrainer::new(ModelRegistry::open(temp.path().join("models")).unwrap());
        let job = TrainingJobSpec::new(temp.path().join("nope.csv"));

        let err = trainer.train_blocking(&job, &NoopProgressSink).unwrap_err();
        assert!(err.is_data_error());
    }

    #[tokio::test]
    async fn test_run_trains_on_blocking_pool() {
        let temp = TempDir::new().unwrap();
        let trainer = ForestTrainer::new(ModelRegistry::open(temp.path().join("models")).unwrap());
        let job = TrainingJobSpec::new(write_csv(&temp, "data.csv", 30));

        let manifest = trainer.run(&job, Arc::new(NoopProgressSink)).await.unwrap();
        assert_eq!(trainer.id(), "random-forest");
        assert!(trainer.registry().load(&manifest.model_id).is_ok());
    }
}
