use crate::artifacts::{ArtifactKind, TrainingManifest, make_artifact, verify_artifact};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::{MANIFEST_FILE, MODEL_FILE, ModelLayout};
use crate::model::ChurnModel;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A model version loaded from the registry.
#[derive(Debug, Clone)]
pub struct PublishedModel {
    pub model: ChurnModel,
    pub manifest: TrainingManifest,
}

/// Versioned on-disk store of trained models.
///
/// Publishing is write-then-rename at two levels: the version directory is
/// assembled under a staging name and renamed into place, then the `LATEST`
/// pointer is replaced the same way. A reader therefore sees either the
/// previous model or the new one, never a partial write.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    layout: ModelLayout,
}

fn read_manifest(path: &Path) -> TrainingResult<TrainingManifest> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice::<TrainingManifest>(&bytes)?)
}

fn validate_model_id(model_id: &str) -> TrainingResult<()> {
    let valid = !model_id.is_empty()
        && !model_id.starts_with('.')
        && model_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TrainingError::InvalidSpec(format!("invalid model id: {model_id:?}")))
    }
}

fn replace_file(path: &Path, contents: &[u8]) -> TrainingResult<()> {
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("file");
    let temp_path = path.with_file_name(format!(".{file_name}.tmp-{}", Uuid::new_v4()));

    std::fs::write(&temp_path, contents)?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        TrainingError::Artifact(format!("failed to replace {}: {e}", path.display()))
    })
}

impl ModelRegistry {
    /// Open (creating if needed) a registry rooted at `root`.
    pub fn open(root: PathBuf) -> TrainingResult<Self> {
        let layout = ModelLayout::new(root);
        layout.ensure_dirs()?;
        Ok(Self { layout })
    }

    #[must_use]
    pub fn layout(&self) -> &ModelLayout {
        &self.layout
    }

    /// Store `model` as version `manifest.model_id` and make it current.
    ///
    /// The manifest's artifact list is filled in here. Publishing an id that
    /// already exists replaces that version.
    pub fn publish(&self, model: &ChurnModel, mut manifest: TrainingManifest) -> TrainingResult<TrainingManifest> {
        let model_id = manifest.model_id.clone();
        validate_model_id(&model_id)?;
        self.layout.ensure_dirs()?;

        let staging = self.layout.staging_dir(&model_id);
        std::fs::create_dir_all(&staging)?;

        let staged = (|| -> TrainingResult<()> {
            model.write_to(&staging.join(MODEL_FILE))?;
            manifest.artifacts = vec![make_artifact(ArtifactKind::Model, &staging, Path::new(MODEL_FILE))?];
            std::fs::write(staging.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;

            self.swap_into_place(&model_id, &staging)
        })();

        if let Err(e) = staged {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        replace_file(&self.layout.latest_pointer(), model_id.as_bytes())?;
        info!(model_id = %model_id, accuracy = manifest.metrics.accuracy, "Published model");
        Ok(manifest)
    }

    /// Rename `staging` to the version directory of `model_id`.
    ///
    /// An existing version is renamed aside and deleted only after the new
    /// directory is in place.
    fn swap_into_place(&self, model_id: &str, staging: &Path) -> TrainingResult<()> {
        let final_dir = self.layout.version_dir(model_id);
        if !final_dir.exists() {
            std::fs::rename(staging, &final_dir)?;
            return Ok(());
        }

        debug!(model_id = %model_id, "Replacing existing model version");
        let retired = self.layout.retired_dir(model_id);
        std::fs::rename(&final_dir, &retired)?;
        if let Err(e) = std::fs::rename(staging, &final_dir) {
            let _ = std::fs::rename(&retired, &final_dir);
            return Err(e.into());
        }
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            warn!(model_id = %model_id, path = %retired.display(), error = %e, "Failed to remove replaced model version");
        }
        Ok(())
    }

    /// Id of the current model, if any model was ever published.
    pub fn latest_id(&self) -> TrainingResult<Option<String>> {
        match std::fs::read_to_string(self.layout.latest_pointer()) {
            Ok(id) => {
                let id = id.trim();
                if id.is_empty() { Ok(None) } else { Ok(Some(id.to_string())) }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn latest_manifest(&self) -> TrainingResult<Option<TrainingManifest>> {
        match self.latest_id()? {
            Some(id) => Ok(Some(self.manifest(&id)?)),
            None => Ok(None),
        }
    }

    pub fn load_latest(&self) -> TrainingResult<Option<PublishedModel>> {
        match self.latest_id()? {
            Some(id) => Ok(Some(self.load(&id)?)),
            None => Ok(None),
        }
    }

    pub fn manifest(&self, model_id: &str) -> TrainingResult<TrainingManifest> {
        validate_model_id(model_id)?;
        let path = self.layout.manifest_path(model_id);
        if !path.exists() {
            return Err(TrainingError::Model(format!("model not found: {model_id}")));
        }
        read_manifest(&path)
    }

    /// Load a specific version, verifying the model checksum against its manifest.
    pub fn load(&self, model_id: &str) -> TrainingResult<PublishedModel> {
        let manifest = self.manifest(model_id)?;
        let dir = self.layout.version_dir(model_id);
        let artifact = manifest.artifact(&ArtifactKind::Model).ok_or_else(|| {
            TrainingError::Artifact(format!("manifest for {model_id} has no model artifact"))
        })?;
        verify_artifact(&dir, artifact)?;

        let model = ChurnModel::read_from(&dir.join(&artifact.file))?;
        Ok(PublishedModel { model, manifest })
    }

    /// All published versions, oldest first.
    pub fn list(&self) -> TrainingResult<Vec<TrainingManifest>> {
        let mut out = Vec::new();

        let dir = match std::fs::read_dir(self.layout.versions_dir()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        for entry in dir {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILE);
            if !manifest_path.exists() {
                continue;
            }
            out.push(read_manifest(&manifest_path)?);
        }

        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::TrainingMetrics;
    use crate::dataset::{Dataset, DatasetId};
    use crate::forest::{ForestParams, RandomForest};
    use crate::job::{TrainingHyperParams, TrainingJobId};
    use tempfile::TempDir;

    fn model() -> ChurnModel {
        let ds = Dataset { features: vec![[1.0, 1.0, 5.0], [30.0, 2.0, 0.0]], labels: vec![1, 0] };
        ChurnModel::new(RandomForest::fit(&ds, &ForestParams { n_trees: 3, ..ForestParams::default() }).unwrap())
    }

    fn manifest(model_id: &str) -> TrainingManifest {
        TrainingManifest {
            model_id: model_id.to_string(),
            job_id: TrainingJobId(model_id.to_string()),
            created_at: chrono::Utc::now(),
            dataset_path: PathBuf::from("uploads/data.csv"),
            dataset_id: DatasetId("abc".to_string()),
            hyperparams: TrainingHyperParams::default(),
            metrics: TrainingMetrics { accuracy: 1.0, train_rows: 1, test_rows: 1 },
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_empty_registry_has_no_model() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        assert!(registry.latest_id().unwrap().is_none());
        assert!(registry.load_latest().unwrap().is_none());
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_publish_then_load_latest() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        let m = model();

        let published = registry.publish(&m, manifest("job-1")).unwrap();
        assert_eq!(published.artifacts.len(), 1);

        let loaded = registry.load_latest().unwrap().unwrap();
        assert_eq!(loaded.model, m);
        assert_eq!(loaded.manifest.model_id, "job-1");
    }

    #[test]
    fn test_latest_moves_to_newest_publish() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();

        registry.publish(&model(), manifest("job-1")).unwrap();
        registry.publish(&model(), manifest("job-2")).unwrap();

        assert_eq!(registry.latest_id().unwrap().as_deref(), Some("job-2"));
        assert_eq!(registry.list().unwrap().len(), 2);
        assert!(registry.load("job-1").is_ok());
    }

    #[test]
    fn test_publish_leaves_no_staging_files() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        registry.publish(&model(), manifest("job-1")).unwrap();
        registry.publish(&model(), manifest("job-1")).unwrap();

        let hidden = |dir: PathBuf| {
            std::fs::read_dir(dir)
                .unwrap()
                .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with('.'))
                .count()
        };
        assert_eq!(hidden(registry.layout().versions_dir()), 0);
        assert_eq!(hidden(registry.layout().root().to_path_buf()), 0);
    }

    #[test]
    fn test_load_detects_corrupted_model() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        registry.publish(&model(), manifest("job-1")).unwrap();

        std::fs::write(registry.layout().model_path("job-1"), b"{}").unwrap();
        assert!(registry.load_latest().is_err());
    }

    #[test]
    fn test_publish_rejects_path_like_ids() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        assert!(registry.publish(&model(), manifest("../escape")).is_err());
        assert!(registry.publish(&model(), manifest("")).is_err());
    }

    #[test]
    fn test_republish_replaces_version_contents() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        registry.publish(&model(), manifest("job-1")).unwrap();

        let mut updated = manifest("job-1");
        updated.metrics.accuracy = 0.5;
        registry.publish(&model(), updated).unwrap();

        let loaded = registry.load("job-1").unwrap();
        assert!((loaded.manifest.metrics.accuracy - 0.5).abs() < f64::EPSILON);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_swap_keeps_existing_version() {
        let temp = TempDir::new().unwrap();
        let registry = ModelRegistry::open(temp.path().join("models")).unwrap();
        registry.publish(&model(), manifest("job-1")).unwrap();

        let missing_staging = registry.layout().staging_dir("job-1");
        assert!(registry.swap_into_place("job-1", &missing_staging).is_err());
        assert!(registry.load_latest().unwrap().is_some());
    }
}
