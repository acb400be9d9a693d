use crate::dataset::{FEATURE_COLUMNS, FeatureRecord};
use crate::error::{TrainingError, TrainingResult};
use crate::forest::RandomForest;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A fitted churn classifier as persisted in the model registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnModel {
    /// Column order the forest was fitted with.
    pub feature_columns: Vec<String>,
    pub forest: RandomForest,
}

impl ChurnModel {
    #[must_use]
    pub fn new(forest: RandomForest) -> Self {
        Self { feature_columns: FEATURE_COLUMNS.iter().map(ToString::to_string).collect(), forest }
    }

    /// Positive-class (churn = 1) probability for each record.
    ///
    /// A model fitted on a single class has no positive column; every record
    /// then scores 0.0.
    #[must_use]
    pub fn predict_churn_proba(&self, records: &[FeatureRecord]) -> Vec<f64> {
        records
            .iter()
            .map(|record| self.forest.positive_proba(&record.to_row()).unwrap_or(0.0))
            .collect()
    }

    pub fn read_from(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        let model: Self = serde_json::from_slice(&bytes)?;
        if model.feature_columns != FEATURE_COLUMNS {
            return Err(TrainingError::Model(format!(
                "unexpected feature columns {:?} in {}",
                model.feature_columns,
                path.display()
            )));
        }
        Ok(model)
    }

    pub fn write_to(&self, path: &Path) -> TrainingResult<()> {
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
