//! Where exported files and element images end up.

use crate::error::DocflowError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under `relative` and return the artifact's location.
    async fn put(&self, relative: &Path, bytes: &[u8]) -> Result<PathBuf, DocflowError>;
}

/// Artifacts written below a root directory on the local file system.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, relative: &Path, bytes: &[u8]) -> Result<PathBuf, DocflowError> {
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(DocflowError::Internal(format!(
                "artifact path escapes the store: {}",
                relative.display()
            )));
        }
        let path = self.root.join(relative);
        write_atomic(&path, bytes).await?;
        debug!("Stored artifact {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

/// Write `bytes` to `path` through a temp file in the same directory and a
/// rename, so readers never see a partial file.
///
/// The write runs on a blocking thread that owns the temp file guard. If the
/// caller stops waiting, the thread still either persists the file or drops
/// the guard, which deletes the temp file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DocflowError> {
    let target = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || persist_blocking(&target, &bytes))
        .await
        .map_err(|e| DocflowError::Internal(format!("Write task panicked: {e}")))?
}

fn persist_blocking(path: &Path, bytes: &[u8]) -> Result<(), DocflowError> {
    let fail = |e| DocflowError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.flush().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn put_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let path = store
            .put(Path::new("ru/md/doc.md"), b"# Hi\n")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("ru/md/doc.md"));
        assert_eq!(std::fs::read(&path).unwrap(), b"# Hi\n");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("ru/md"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("doc.md")]);
    }

    #[tokio::test]
    async fn abandoned_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.md");
        let big = vec![b'x'; 64 * 1024 * 1024];

        let _ = tokio::time::timeout(Duration::from_millis(1), write_atomic(&out, &big)).await;

        // The blocking writer finishes on its own; wait for the dust to settle.
        let mut names = Vec::new();
        for _ in 0..100 {
            names = std::fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect::<Vec<_>>();
            if names.iter().all(|n| n == "out.md") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(names.iter().all(|n| n == "out.md"), "orphaned temp file: {names:?}");
        if out.exists() {
            assert_eq!(std::fs::metadata(&out).unwrap().len(), big.len() as u64);
        }
    }

    #[tokio::test]
    async fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a.json");
        write_atomic(&out, b"{}").await.unwrap();
        write_atomic(&out, b"[1]").await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"[1]");
    }

    #[tokio::test]
    async fn put_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert!(store.put(Path::new("../x"), b"").await.is_err());
    }
}
