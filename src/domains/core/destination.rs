use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::errors::ExportError;

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid destination component: {0}")]
    InvalidComponent(String),
}

pub type DestinationResult<T> = Result<T, DestinationError>;

impl From<DestinationError> for ExportError {
    fn from(err: DestinationError) -> Self {
        ExportError::DestinationWrite(err.to_string())
    }
}

/// Reference to where a run's final artifacts should land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationRef {
    pub directory: PathBuf,
    /// Base name for the run's artifacts, without extension.
    pub file_stem: String,
}

/// An artifact written to staging, not yet visible at the destination.
#[derive(Debug)]
pub struct StagedArtifact {
    pub staging_path: PathBuf,
    pub file_name: String,
}

/// Storage area that receives finished artifacts.
///
/// Nothing appears at the destination until `commit`; a discarded or
/// abandoned target leaves the destination untouched. Commit is whole-file
/// atomic.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Open a staged write target that will be published as `file_name`.
    async fn open(&self, file_name: &str) -> DestinationResult<StagedArtifact>;

    /// Atomically publish a staged artifact; returns its final location.
    async fn commit(
        &self,
        staged: StagedArtifact,
        dest: &DestinationRef,
    ) -> DestinationResult<PathBuf>;

    /// Drop a staged artifact without publishing it.
    async fn discard(&self, staged: StagedArtifact) -> DestinationResult<()>;
}

/// Filesystem-backed destination with a private staging directory.
///
/// Commit renames the staged file into the destination directory, picking a
/// `name(1).ext` style suffix when the name is already taken.
pub struct LocalDestinationStore {
    staging: tempfile::TempDir,
}

impl LocalDestinationStore {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            staging: tempfile::tempdir()?,
        })
    }

    fn sanitize_component(component: &str) -> DestinationResult<&str> {
        if component.is_empty()
            || component.contains('/')
            || component.contains('\\')
            || component == "."
            || component == ".."
        {
            Err(DestinationError::InvalidComponent(component.to_string()))
        } else {
            Ok(component)
        }
    }

    /// First free path for `file_name` in `dir`: name.ext, name(1).ext, ...
    async fn unique_path(dir: &Path, file_name: &str) -> DestinationResult<PathBuf> {
        let candidate = dir.join(file_name);
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }

        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let mut count = 1u32;
        loop {
            let candidate = dir.join(format!("{}({}){}", stem, count, extension));
            if !fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
            count += 1;
        }
    }
}

#[async_trait]
impl DestinationStore for LocalDestinationStore {
    async fn open(&self, file_name: &str) -> DestinationResult<StagedArtifact> {
        let sanitized = Self::sanitize_component(file_name)?;
        let staging_path = self
            .staging
            .path()
            .join(format!("{}-{}", Uuid::new_v4(), sanitized));
        Ok(StagedArtifact {
            staging_path,
            file_name: sanitized.to_string(),
        })
    }

    async fn commit(
        &self,
        staged: StagedArtifact,
        dest: &DestinationRef,
    ) -> DestinationResult<PathBuf> {
        fs::create_dir_all(&dest.directory).await?;
        let target = Self::unique_path(&dest.directory, &staged.file_name).await?;

        match fs::rename(&staged.staging_path, &target).await {
            Ok(()) => {}
            Err(_) => {
                // Staging and destination may sit on different filesystems.
                fs::copy(&staged.staging_path, &target).await?;
                fs::remove_file(&staged.staging_path).await?;
            }
        }
        Ok(target)
    }

    async fn discard(&self, staged: StagedArtifact) -> DestinationResult<()> {
        match fs::remove_file(&staged.staging_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn dest_in(dir: &Path) -> DestinationRef {
        DestinationRef {
            directory: dir.to_path_buf(),
            file_stem: "export".to_string(),
        }
    }

    #[tokio::test]
    async fn commit_publishes_the_staged_file() {
        let dest_dir = tempdir().expect("tempdir");
        let store = LocalDestinationStore::new().expect("store");

        let staged = store.open("export.csv").await.expect("open");
        tokio::fs::write(&staged.staging_path, b"id\n1\n")
            .await
            .expect("stage");

        let published = store
            .commit(staged, &dest_in(dest_dir.path()))
            .await
            .expect("commit");
        assert_eq!(published, dest_dir.path().join("export.csv"));
        let contents = tokio::fs::read_to_string(&published).await.expect("read");
        assert_eq!(contents, "id\n1\n");
    }

    #[tokio::test]
    async fn name_collisions_get_a_numbered_suffix() {
        let dest_dir = tempdir().expect("tempdir");
        let store = LocalDestinationStore::new().expect("store");
        let dest = dest_in(dest_dir.path());

        for expected in ["export.csv", "export(1).csv", "export(2).csv"] {
            let staged = store.open("export.csv").await.expect("open");
            tokio::fs::write(&staged.staging_path, b"x").await.expect("stage");
            let published = store.commit(staged, &dest).await.expect("commit");
            assert_eq!(published, dest_dir.path().join(expected));
        }
    }

    #[tokio::test]
    async fn discard_leaves_the_destination_untouched() {
        let dest_dir = tempdir().expect("tempdir");
        let store = LocalDestinationStore::new().expect("store");

        let staged = store.open("export.csv").await.expect("open");
        tokio::fs::write(&staged.staging_path, b"x").await.expect("stage");
        store.discard(staged).await.expect("discard");

        let mut entries = tokio::fs::read_dir(dest_dir.path()).await.expect("read dir");
        assert!(entries.next_entry().await.expect("entry").is_none());
    }

    #[tokio::test]
    async fn path_traversal_components_are_rejected() {
        let store = LocalDestinationStore::new().expect("store");
        assert!(store.open("../evil.csv").await.is_err());
        assert!(store.open("").await.is_err());
    }
}
