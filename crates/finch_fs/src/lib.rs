//! # Finch FileSystem
//! [![Crates.io](https://img.shields.io/crates/v/finch_fs.svg)](https://crates.io/crates/finch_fs)
//! [![Docs](https://docs.rs/finch_fs/badge.svg)](https://docs.rs/finch_fs/)
//!
//! Local file system pieces of finch.
//!
//! * **[`JobPackager`]**: Stages the library tree and the entry-point script into a clean directory and
//!   builds its content-addressed [`SnapshotManifest`](finch_core::snapshot::SnapshotManifest).
//! * **[`FileSystemArtifactStore`]**: An [`ArtifactStore`] reading run outputs from a local (or mounted) directory.
//! * **[`atomic_write`]**: Uses temporary files and rename operations so downloaded artifacts are never read partially.
//!
//! ## Usage
//!
//! ```no_run
//! use finch_fs::JobPackager;
//!
//! # async fn run() -> Result<(), finch_core::error::SubmissionError> {
//! let packager = JobPackager::new("./utils_nlp", "./train.py", "./entailment_xnli_bert_azureml");
//! let snapshot = packager.package().await?;
//! println!("{} files staged", snapshot.manifest.files.len());
//! # Ok(())
//! # }
//! ```

mod packager;

pub use packager::JobPackager;

use bytes::Bytes;
use finch_core::prelude::*;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Writes `data` to `path` through a temporary sibling file, creating parent directories.
pub async fn atomic_write(path: &Path, data: Bytes) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await?;

    Ok(())
}

/// Joins a relative artifact path onto `root`, rejecting absolute paths and `..` components.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, ArtifactError> {
    let relative_path = Path::new(relative);
    if relative.trim().is_empty() {
        return Err(ArtifactError::InvalidPath(relative.to_string()));
    }

    let mut joined = root.to_path_buf();
    for component in relative_path.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return Err(ArtifactError::InvalidPath(relative.to_string())),
        }
    }

    Ok(joined)
}

/// Reads run outputs from `<root>/<run id>/<artifact path>`.
#[derive(Clone, Debug)]
pub struct FileSystemArtifactStore {
    root: PathBuf,
}

impl FileSystemArtifactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    fn get_path(&self, run_id: &str, path: &str) -> Result<PathBuf, ArtifactError> {
        safe_join(&self.root, &self.get_artifact_path(run_id, path))
    }
}

impl ArtifactStore for FileSystemArtifactStore {
    async fn fetch(&self, run_id: &str, path: &str) -> Result<Bytes, ArtifactError> {
        let full = self.get_path(run_id, path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(path.to_string()))
            }
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    async fn list(&self, run_id: &str) -> Result<Vec<String>, ArtifactError> {
        let run_root = safe_join(&self.root, run_id)?;
        let listed = tokio::task::spawn_blocking(move || {
            let mut names = Vec::new();
            for entry in walkdir::WalkDir::new(&run_root).sort_by_file_name() {
                let entry = entry.map_err(|e| ArtifactError::System(e.to_string()))?;
                if entry.file_type().is_file() {
                    if let Ok(rel) = entry.path().strip_prefix(&run_root) {
                        names.push(packager::to_slash_path(rel));
                    }
                }
            }
            Ok::<_, ArtifactError>(names)
        })
        .await
        .map_err(|e| ArtifactError::System(e.to_string()))??;

        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_rejects_escaping_paths() {
        let root = Path::new("/tmp/out");
        assert_eq!(
            safe_join(root, "outputs/results.json").unwrap(),
            root.join("outputs").join("results.json")
        );
        assert!(safe_join(root, "../secrets").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, "").is_err());
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/results.json");
        atomic_write(&target, Bytes::from_static(b"{}")).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
        assert!(!dir.path().join("a/b/results.json.tmp").exists());
    }

    #[tokio::test]
    async fn store_reads_and_lists_run_outputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("run-1/outputs")).unwrap();
        std::fs::write(dir.path().join("run-1/outputs/results.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("run-1/driver.log"), b"ok").unwrap();

        let store = FileSystemArtifactStore::new(dir.path());
        assert_eq!(
            store.fetch("run-1", "outputs/results.json").await.unwrap(),
            Bytes::from_static(b"{}")
        );
        assert!(matches!(
            store.fetch("run-1", "outputs/missing.json").await,
            Err(ArtifactError::NotFound(_))
        ));
        assert_eq!(
            store.list("run-1").await.unwrap(),
            vec!["driver.log".to_string(), "outputs/results.json".to_string()]
        );
    }
}
