use crate::error::{TrainingError, TrainingResult};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

/// Feature columns, in the order the model consumes them.
pub const FEATURE_COLUMNS: [&str; NUM_FEATURES] = ["tenure", "usage_freq", "complaints"];

/// Binary label column (1 = churned).
pub const LABEL_COLUMN: &str = "churn";

pub const NUM_FEATURES: usize = 3;

pub type FeatureRow = [f64; NUM_FEATURES];

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// A single customer record as submitted for prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub tenure: f64,
    pub usage_freq: f64,
    pub complaints: f64,
}

impl FeatureRecord {
    #[must_use]
    pub const fn to_row(&self) -> FeatureRow {
        [self.tenure, self.usage_freq, self.complaints]
    }
}

/// Tabular churn dataset: one feature row and one 0/1 label per customer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub features: Vec<FeatureRow>,
    pub labels: Vec<u8>,
}

impl Dataset {
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn distinct_labels(&self) -> BTreeSet<u8> {
        self.labels.iter().copied().collect()
    }

    #[must_use]
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            features: indices.iter().map(|&i| self.features[i]).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Load a churn dataset from a CSV file with a header row.
pub fn load_csv(path: &Path) -> TrainingResult<Dataset> {
    let file = std::fs::File::open(path).map_err(|e| {
        TrainingError::Data(format!("failed to read dataset {}: {e}", path.display()))
    })?;
    read_csv(file)
}

/// Parse a churn dataset from any CSV source.
///
/// Extra columns are ignored. The label column is checked first, then each
/// feature column; every value must parse as a number and labels must be 0 or 1.
pub fn read_csv<R: Read>(source: R) -> TrainingResult<Dataset> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(source);
    let headers = reader.headers()?.clone();

    let column = |name: &str| headers.iter().position(|h| h == name);

    let label_idx = column(LABEL_COLUMN)
        .ok_or_else(|| TrainingError::Data(format!("Missing \"{LABEL_COLUMN}\" column")))?;

    let mut feature_idx = [0usize; NUM_FEATURES];
    for (slot, name) in feature_idx.iter_mut().zip(FEATURE_COLUMNS) {
        *slot = column(name).ok_or_else(|| TrainingError::Data(format!("Missing \"{name}\" column")))?;
    }

    let mut dataset = Dataset::default();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        // header is line 1
        let line = row + 2;

        let mut features = [0f64; NUM_FEATURES];
        for ((value, &idx), name) in features.iter_mut().zip(&feature_idx).zip(FEATURE_COLUMNS) {
            *value = parse_number(record.get(idx), line, name)?;
        }

        let label = parse_number(record.get(label_idx), line, LABEL_COLUMN)?;
        let label = if label == 0.0 {
            0
        } else if label == 1.0 {
            1
        } else {
            return Err(TrainingError::Data(format!(
                "line {line}: \"{LABEL_COLUMN}\" must be 0 or 1, got {label}"
            )));
        };

        dataset.features.push(features);
        dataset.labels.push(label);
    }

    Ok(dataset)
}

fn parse_number(raw: Option<&str>, line: usize, column: &str) -> TrainingResult<f64> {
    let raw = raw.unwrap_or_default();
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| TrainingError::Data(format!("line {line}: \"{column}\" is not numeric: {raw:?}")))
}

/// A binary classifier needs both classes present.
pub fn validate_labels(dataset: &Dataset) -> TrainingResult<()> {
    if dataset.is_empty() {
        return Err(TrainingError::Data("dataset has no rows".to_string()));
    }
    let classes = dataset.distinct_labels();
    if classes.len() < 2 {
        return Err(TrainingError::Data(format!(
            "Only one churn value found: {classes:?} - need both 0 and 1"
        )));
    }
    Ok(())
}

/// Shuffle with a fixed seed and split off `ceil(len * test_ratio)` rows for evaluation.
///
/// Returns `(train, test)`.
pub fn train_test_split(dataset: &Dataset, test_ratio: f64, seed: u64) -> TrainingResult<(Dataset, Dataset)> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(TrainingError::InvalidSpec(format!("test_ratio must be in (0, 1), got {test_ratio}")));
    }

    let n = dataset.len();
    let test_len = (n as f64 * test_ratio).ceil() as usize;
    if test_len == 0 || test_len >= n {
        return Err(TrainingError::Data(format!(
            "not enough rows to split {n} rows with test_ratio {test_ratio}"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(test_len);
    Ok((dataset.subset(train_idx), dataset.subset(test_idx)))
}

pub fn compute_dataset_id(path: &Path) -> TrainingResult<DatasetId> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(DatasetId(hex::encode(hasher.finalize())))
}
