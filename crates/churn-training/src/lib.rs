//! Churn Training
//!
//! Training primitives for the churn service:
//! - Loading and validating churn datasets (`Dataset`)
//! - Fitting a seeded random-forest classifier (`RandomForest`)
//! - Describing training jobs (`TrainingJobSpec`)
//! - Publishing models atomically to a versioned registry (`ModelRegistry`)
//! - Implementing training backends (`Trainer`)

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod forest;
pub mod job;
pub mod layout;
pub mod model;
pub mod progress;
pub mod registry;
pub mod trainer;

pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use dataset::{
    Dataset, DatasetId, FEATURE_COLUMNS, FeatureRecord, LABEL_COLUMN, load_csv, read_csv, train_test_split,
    validate_labels,
};
pub use error::{TrainingError, TrainingResult};
pub use forest::{ForestParams, RandomForest};
pub use job::{TrainingHyperParams, TrainingJobId, TrainingJobSpec};
pub use layout::ModelLayout;
pub use model::ChurnModel;
pub use progress::{NoopProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
pub use registry::{ModelRegistry, PublishedModel};
pub use trainer::{ForestTrainer, Trainer};
