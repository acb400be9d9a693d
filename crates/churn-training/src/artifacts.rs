use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{TrainingHyperParams, TrainingJobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Model,
    Other,
}

/// A file inside a model version directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    /// Path relative to the version directory.
    pub file: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainingMetrics {
    /// Accuracy on the held-out split.
    pub accuracy: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub model_id: String,
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub dataset_path: PathBuf,
    pub dataset_id: DatasetId,
    pub hyperparams: TrainingHyperParams,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
}

impl TrainingManifest {
    #[must_use]
    pub fn artifact(&self, kind: &ArtifactKind) -> Option<&TrainingArtifact> {
        self.artifacts.iter().find(|a| &a.kind == kind)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Hash `dir/file` and describe it relative to `dir`.
pub fn make_artifact(kind: ArtifactKind, dir: &Path, file: &Path) -> TrainingResult<TrainingArtifact> {
    let path = dir.join(file);
    if !path.exists() {
        return Err(TrainingError::Artifact(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(&path)?;
    Ok(TrainingArtifact { kind, file: file.to_path_buf(), sha256: hash })
}

/// Re-hash an artifact and compare with the recorded digest.
pub fn verify_artifact(dir: &Path, artifact: &TrainingArtifact) -> TrainingResult<()> {
    let actual = sha256_file(&dir.join(&artifact.file))?;
    if actual != artifact.sha256 {
        return Err(TrainingError::Artifact(format!(
            "checksum mismatch for {}: expected {}, found {actual}",
            artifact.file.display(),
            artifact.sha256
        )));
    }
    Ok(())
}
