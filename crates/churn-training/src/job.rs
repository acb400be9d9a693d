use crate::error::{TrainingError, TrainingResult};
use crate::forest::ForestParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingHyperParams {
    pub seed: u64,
    pub test_ratio: f64,
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        let forest = ForestParams::default();
        Self {
            seed: forest.seed,
            test_ratio: 0.2,
            n_trees: forest.n_trees,
            max_depth: forest.max_depth,
            min_samples_split: forest.min_samples_split,
        }
    }
}

impl TrainingHyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(TrainingError::InvalidSpec("test_ratio must be in (0, 1)".to_string()));
        }
        self.forest_params().validate()
    }

    #[must_use]
    pub const fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            seed: self.seed,
        }
    }
}

/// A queued request to train a churn model from a dataset on disk.
///
/// Jobs carry the dataset by reference; the file must stay in place until
/// the job finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub dataset_path: PathBuf,
    pub hyperparams: TrainingHyperParams,
}

impl TrainingJobSpec {
    #[must_use]
    pub fn new(dataset_path: PathBuf) -> Self {
        Self::with_id(TrainingJobId::new(), dataset_path)
    }

    #[must_use]
    pub fn with_id(job_id: TrainingJobId, dataset_path: PathBuf) -> Self {
        Self { job_id, created_at: Utc::now(), dataset_path, hyperparams: TrainingHyperParams::default() }
    }

    #[must_use]
    pub fn with_hyperparams(mut self, hyperparams: TrainingHyperParams) -> Self {
        self.hyperparams = hyperparams;
        self
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.dataset_path.as_os_str().is_empty() {
            return Err(TrainingError::InvalidSpec("dataset_path is required".to_string()));
        }
        self.hyperparams.validate()
    }
}
