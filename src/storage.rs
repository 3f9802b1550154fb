//! Sketch uploads and generated artifacts on local disk.
//!
//! Layout under the media root:
//! - `uploads/sketch_<id><ext>`
//! - `generated/generated_<id>.png`, served at `/media/generated/`
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MEDIA_URL_PREFIX: &str = "/media";
const UPLOADS_DIR: &str = "uploads";
const GENERATED_DIR: &str = "generated";
const DEFAULT_EXTENSION: &str = ".png";

/// 32 lowercase hex characters identifying one request's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SketchId(String);

impl SketchId {
    pub fn new() -> Self {
        SketchId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SketchId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StoredSketch {
    pub id: SketchId,
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MediaStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join(GENERATED_DIR)
    }

    pub async fn ensure_dirs(&self) -> AppResult<()> {
        for dir in [self.uploads_dir(), self.generated_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| AppError::StorageWrite { path: dir.clone(), source })?;
        }
        Ok(())
    }

    /// Write the uploaded bytes under a fresh id. `original_name` only
    /// contributes its extension.
    pub async fn persist_sketch(&self, original_name: Option<&str>, bytes: &[u8]) -> AppResult<StoredSketch> {
        let id = SketchId::new();
        let file_name = format!("sketch_{}{}", id.as_str(), extension_of(original_name));
        let path = self.uploads_dir().join(&file_name);
        write_file(&path, bytes).await?;
        Ok(StoredSketch { id, file_name, path })
    }

    pub fn artifact_for(&self, id: &SketchId) -> Artifact {
        let file_name = format!("generated_{}.png", id.as_str());
        Artifact {
            path: self.generated_dir().join(&file_name),
            url: format!("{}/{}/{}", MEDIA_URL_PREFIX, GENERATED_DIR, file_name),
            file_name,
        }
    }

    pub async fn write_artifact(&self, artifact: &Artifact, bytes: &[u8]) -> AppResult<()> {
        write_file(&artifact.path, bytes).await
    }

    /// Degraded result: the sketch itself becomes the artifact.
    pub async fn copy_sketch(&self, sketch: &StoredSketch, artifact: &Artifact) -> AppResult<()> {
        fs::copy(&sketch.path, &artifact.path)
            .await
            .map(|_| ())
            .map_err(|source| AppError::StorageWrite { path: artifact.path.clone(), source })
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> AppResult<()> {
    fs::write(path, bytes)
        .await
        .map_err(|source| AppError::StorageWrite { path: path.to_path_buf(), source })
}

/// `.ext` of the client's file name, or `.png` when there is none or it
/// contains anything other than ASCII letters and digits.
fn extension_of(original_name: Option<&str>) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_rules() {
        assert_eq!(extension_of(Some("front.JPG")), ".JPG");
        assert_eq!(extension_of(Some("archive.tar.gz")), ".gz");
        assert_eq!(extension_of(Some("sketch")), ".png");
        assert_eq!(extension_of(None), ".png");
        assert_eq!(extension_of(Some("weird.p g")), ".png");
    }

    #[test]
    fn ids_are_32_hex() {
        let id = SketchId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, SketchId::new());
    }

    #[tokio::test]
    async fn sketch_and_artifact_share_the_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        store.ensure_dirs().await.unwrap();

        let sketch = store.persist_sketch(Some("dress.jpeg"), b"jpeg-bytes").await.unwrap();
        assert_eq!(sketch.file_name, format!("sketch_{}.jpeg", sketch.id.as_str()));
        assert_eq!(std::fs::read(&sketch.path).unwrap(), b"jpeg-bytes");

        let artifact = store.artifact_for(&sketch.id);
        assert_eq!(artifact.url, format!("/media/generated/generated_{}.png", sketch.id.as_str()));
        store.copy_sketch(&sketch, &artifact).await.unwrap();
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn write_failure_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        // uploads/ never created
        let store = MediaStore::new(dir.path().join("missing"));
        let err = store.persist_sketch(Some("a.png"), b"x").await.unwrap_err();
        assert!(matches!(err, AppError::StorageWrite { .. }));
        assert_eq!(err.kind(), "storage");
    }
}
