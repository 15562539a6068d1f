use finch_core::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Directories never shipped to the workers.
const SKIPPED_DIRS: &[&str] = &["__pycache__", ".ipynb_checkpoints", ".git"];

/// Stages the reusable library tree and the entry-point script into a clean directory.
///
/// Staging is destructive: an existing staging directory is removed before copying,
/// so repeated runs always leave exactly one copy of the library.
#[derive(Clone, Debug)]
pub struct JobPackager {
    library_dir: PathBuf,
    entry_script: PathBuf,
    staging_dir: PathBuf,
}

impl JobPackager {
    pub fn new(
        library_dir: impl Into<PathBuf>,
        entry_script: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            library_dir: library_dir.into(),
            entry_script: entry_script.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Name of the entry script inside the staging directory.
    pub fn entry_script_name(&self) -> Result<String, SubmissionError> {
        self.entry_script
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                SubmissionError::InvalidDescriptor(format!(
                    "entry script {} has no file name",
                    self.entry_script.display()
                ))
            })
    }

    /// Recreates the staging directory. Returns its path.
    pub async fn stage(&self) -> Result<PathBuf, SubmissionError> {
        let packager = self.clone();
        tokio::task::spawn_blocking(move || packager.stage_blocking())
            .await
            .map_err(|e| SubmissionError::System(format!("Staging task failed: {e}")))?
    }

    /// Builds the manifest of the current staging directory.
    pub async fn snapshot(&self) -> Result<Snapshot, SubmissionError> {
        let root = self.staging_dir.clone();
        tokio::task::spawn_blocking(move || build_snapshot(&root))
            .await
            .map_err(|e| SubmissionError::System(format!("Snapshot task failed: {e}")))?
    }

    /// [`stage`](Self::stage) followed by [`snapshot`](Self::snapshot).
    pub async fn package(&self) -> Result<Snapshot, SubmissionError> {
        self.stage().await?;
        let snapshot = self.snapshot().await?;
        info!(
            "Packaged {} files ({} bytes) into {}",
            snapshot.manifest.files.len(),
            snapshot.manifest.total_size(),
            self.staging_dir.display()
        );
        Ok(snapshot)
    }

    fn stage_blocking(&self) -> Result<PathBuf, SubmissionError> {
        if !self.library_dir.is_dir() {
            return Err(SubmissionError::InvalidDescriptor(format!(
                "library directory {} does not exist",
                self.library_dir.display()
            )));
        }
        if !self.entry_script.is_file() {
            return Err(SubmissionError::InvalidDescriptor(format!(
                "entry script {} does not exist",
                self.entry_script.display()
            )));
        }

        let staging = std::path::absolute(&self.staging_dir)?;
        let library = std::path::absolute(&self.library_dir)?;
        let script = std::path::absolute(&self.entry_script)?;
        if library.starts_with(&staging) || script.starts_with(&staging) || staging.starts_with(&library) {
            return Err(SubmissionError::InvalidDescriptor(format!(
                "staging directory {} overlaps the sources it would be built from",
                self.staging_dir.display()
            )));
        }

        if staging.exists() {
            debug!("Removing previous staging directory {}", staging.display());
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        let library_name = library.file_name().ok_or_else(|| {
            SubmissionError::InvalidDescriptor(format!(
                "library directory {} has no name",
                library.display()
            ))
        })?;
        copy_tree(&library, &staging.join(library_name))?;
        std::fs::copy(&script, staging.join(self.entry_script_name()?))?;

        Ok(staging)
    }
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIPPED_DIRS
            .iter()
            .any(|skip| entry.file_name().to_string_lossy() == *skip)
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), SubmissionError> {
    for entry in WalkDir::new(from).into_iter().filter_entry(|e| !is_skipped(e)) {
        let entry = entry.map_err(|e| SubmissionError::System(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| SubmissionError::System(e.to_string()))?;
        let target = to.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn build_snapshot(root: &Path) -> Result<Snapshot, SubmissionError> {
    let mut manifest = SnapshotManifest::default();

    for entry in WalkDir::new(root).into_iter().filter_entry(|e| !is_skipped(e)) {
        let entry = entry.map_err(|e| SubmissionError::System(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let data = std::fs::read(entry.path())?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| SubmissionError::System(e.to_string()))?;

        manifest.files.insert(
            to_slash_path(rel),
            SnapshotEntry {
                hash: hex::encode(Sha256::digest(&data)),
                size: data.len() as u64,
            },
        );
    }

    Ok(Snapshot {
        root: root.to_path_buf(),
        manifest,
    })
}

pub(crate) fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
