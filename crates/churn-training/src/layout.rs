use crate::error::TrainingResult;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MODEL_FILE: &str = "model.json";
pub const MANIFEST_FILE: &str = "training_manifest.json";
pub const LATEST_POINTER: &str = "LATEST";

/// Filesystem layout of the model registry.
///
/// ```text
/// <root>/LATEST                          id of the current model
/// <root>/versions/<model_id>/model.json
/// <root>/versions/<model_id>/training_manifest.json
/// ```
#[derive(Debug, Clone)]
pub struct ModelLayout {
    root: PathBuf,
}

impl ModelLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    #[must_use]
    pub fn version_dir(&self, model_id: &str) -> PathBuf {
        self.versions_dir().join(model_id)
    }

    #[must_use]
    pub fn model_path(&self, model_id: &str) -> PathBuf {
        self.version_dir(model_id).join(MODEL_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self, model_id: &str) -> PathBuf {
        self.version_dir(model_id).join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn latest_pointer(&self) -> PathBuf {
        self.root.join(LATEST_POINTER)
    }

    /// Unique scratch directory next to the versions, so the final rename
    /// stays on one filesystem. Hidden names are skipped when listing.
    #[must_use]
    pub fn staging_dir(&self, model_id: &str) -> PathBuf {
        self.versions_dir().join(format!(".{model_id}.tmp-{}", Uuid::new_v4()))
    }

    /// Where a replaced version is parked until the new one is in place.
    #[must_use]
    pub fn retired_dir(&self, model_id: &str) -> PathBuf {
        self.versions_dir().join(format!(".{model_id}.old-{}", Uuid::new_v4()))
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(self.versions_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = ModelLayout::new(temp.path().join("models"));

        assert!(layout.model_path("job-1").ends_with("versions/job-1/model.json"));
        assert!(layout.manifest_path("job-1").ends_with("versions/job-1/training_manifest.json"));
        assert!(layout.latest_pointer().ends_with("models/LATEST"));
        assert_ne!(layout.staging_dir("job-1"), layout.staging_dir("job-1"));
    }

    #[test]
    fn test_ensure_dirs_creates_versions() {
        let temp = TempDir::new().unwrap();
        let layout = ModelLayout::new(temp.path().join("models"));
        layout.ensure_dirs().unwrap();
        assert!(layout.versions_dir().is_dir());
    }
}
