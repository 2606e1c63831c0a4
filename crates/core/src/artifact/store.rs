//! # Artifact Store
//!
//! Owns the on-disk lifetime of retrieved artifacts. Every acquisition gets
//! its own freshly allocated directory under the storage root, so concurrent
//! sessions can never read or delete each other's files.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;

use super::classify::{classify, Classification};
use super::source::ArtifactSource;
use crate::error::RetrievalError;

/// A locally materialized file under inspection.
///
/// Deleted by [`Artifact::release`], or on drop if it was never released.
#[derive(Debug)]
pub struct Artifact {
    dir: Option<TempDir>,
    path: PathBuf,
    origin: String,
    classification: OnceLock<Classification>,
}

impl Artifact {
    /// Wrap a file that lives inside `dir`; the artifact takes ownership of the directory.
    pub fn new(dir: TempDir, path: PathBuf, origin: impl Into<String>) -> Self {
        Self {
            dir: Some(dir),
            path,
            origin: origin.into(),
            classification: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the artifact; gone after release
    pub fn storage_dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Source location the artifact was retrieved from
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Platform classification, computed once on first access.
    ///
    /// Reads the file synchronously when not cached yet; async callers use
    /// [`Artifact::resolve_classification`].
    pub fn classification(&self) -> Classification {
        *self.classification.get_or_init(|| classify(&self.path))
    }

    /// Classify on the blocking pool and cache the result
    pub async fn resolve_classification(&self) -> Classification {
        if let Some(cached) = self.classification.get() {
            return *cached;
        }
        let path = self.path.clone();
        let computed = match tokio::task::spawn_blocking(move || classify(&path)).await {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(error = %e, "Classification task failed");
                Classification::Unknown
            }
        };
        *self.classification.get_or_init(|| computed)
    }

    /// Delete the artifact and its directory, reporting any failure
    pub fn release(mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

/// Allocates per-session storage and fills it through an [`ArtifactSource`]
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    source: Arc<dyn ArtifactSource>,
    max_bytes: u64,
}

impl ArtifactStore {
    /// Open the store, creating the storage root if needed
    pub fn open(
        root: impl Into<PathBuf>,
        source: Arc<dyn ArtifactSource>,
        max_bytes: u64,
    ) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            source,
            max_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a unique directory, retrieve `source_ref` into it and check it can be opened
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, source_ref: &str) -> Result<Artifact, RetrievalError> {
        let dir = self.allocate()?;
        let path = self.source.fetch(source_ref, dir.path(), self.max_bytes).await?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(RetrievalError::Unavailable(path)),
        }

        let artifact = Artifact::new(dir, path, source_ref);
        let classification = artifact.resolve_classification().await;
        tracing::info!(path = %artifact.path().display(), %classification, "Artifact acquired");
        Ok(artifact)
    }

    /// Fresh, non-colliding directory under the root
    pub fn allocate(&self) -> std::io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix("artifact-")
            .tempdir_in(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::source::LocalSource;

    fn store(root: &Path) -> ArtifactStore {
        ArtifactStore::open(root.join("store"), Arc::new(LocalSource), 1024 * 1024).unwrap()
    }

    fn sample(dir: &Path) -> PathBuf {
        let path = dir.join("sample.elf");
        std::fs::write(&path, b"\x7fELF\x02\x01\x01\0").unwrap();
        path
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let scratch = tempfile::tempdir().unwrap();
        let store = store(scratch.path());
        let src = sample(scratch.path());

        let artifact = store.acquire(src.to_str().unwrap()).await.unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        assert!(path.starts_with(store.root()));
        assert_eq!(artifact.classification(), Classification::Linux);

        artifact.release().unwrap();
        assert!(!path.exists());
        // original is untouched
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_acquire_classifies_up_front() {
        let scratch = tempfile::tempdir().unwrap();
        let store = store(scratch.path());
        let src = sample(scratch.path());

        let artifact = store.acquire(src.to_str().unwrap()).await.unwrap();
        assert_eq!(artifact.classification.get(), Some(&Classification::Linux));
        assert_eq!(artifact.resolve_classification().await, Classification::Linux);
    }

    #[tokio::test]
    async fn test_drop_deletes_storage() {
        let scratch = tempfile::tempdir().unwrap();
        let store = store(scratch.path());
        let src = sample(scratch.path());

        let artifact = store.acquire(src.to_str().unwrap()).await.unwrap();
        let dir = artifact.storage_dir().unwrap().to_path_buf();
        drop(artifact);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_concurrent_acquisitions_do_not_collide() {
        let scratch = tempfile::tempdir().unwrap();
        let store = store(scratch.path());
        let src = sample(scratch.path());
        let src = src.to_str().unwrap();

        let (a, b) = tokio::join!(store.acquire(src), store.acquire(src));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path(), b.path());

        let b_path = b.path().to_path_buf();
        a.release().unwrap();
        assert!(b_path.exists());
        b.release().unwrap();
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let store = store(scratch.path());

        let err = store
            .acquire(scratch.path().join("nope.exe").to_str().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.notice().error, "retrieval-failed");

        // the allocated directory did not leak
        let leftovers = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
