//! # Finch OpenDAL Artifact Store
//! [![Crates.io](https://img.shields.io/crates/v/finch_opendal.svg)](https://crates.io/crates/finch_opendal)
//! [![Docs](https://docs.rs/finch_opendal/badge.svg)](https://docs.rs/finch_opendal/)
//!
//! An artifact store powered by [Apache OpenDAL](https://opendal.apache.org/).
//!
//! Reads run outputs straight from the storage account the platform writes them to
//! (Azure Blob Storage, S3, GCS, the file system and more). Artifacts are expected at
//! `<run id>/<artifact path>` relative to the operator's root.
//!
//! ## Usage
//!
//! ```no_run
//! # use finch_opendal::OpendalArtifactStore;
//! # use opendal::{Operator, services::Azblob};
//! # fn run() -> opendal::Result<()> {
//! let builder = Azblob::default()
//!     .container("azureml")
//!     .root("ExperimentRun");
//!
//! let op = Operator::new(builder)?.finish();
//! let store = OpendalArtifactStore::new(op);
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use finch_core::prelude::*;
use opendal::{EntryMode, ErrorKind, Operator};
use tracing::debug;

#[derive(Clone)]
pub struct OpendalArtifactStore {
    op: Operator,
}

impl OpendalArtifactStore {
    /// Create a new store from an OpenDAL Operator.
    /// The Operator can be configured for any supported backend e.g., azblob, s3, fs, gcs, etc.
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

fn to_artifact_error(e: opendal::Error) -> ArtifactError {
    ArtifactError::System(format!("OpenDAL error: {e}"))
}

impl ArtifactStore for OpendalArtifactStore {
    async fn fetch(&self, run_id: &str, path: &str) -> Result<Bytes, ArtifactError> {
        let key = self.get_artifact_path(run_id, path);
        debug!("Reading {key}");

        match self.op.read(&key).await {
            Ok(buffer) => Ok(buffer.to_bytes()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ArtifactError::NotFound(path.to_string())),
            Err(e) => Err(to_artifact_error(e)),
        }
    }

    async fn list(&self, run_id: &str) -> Result<Vec<String>, ArtifactError> {
        let prefix = format!("{run_id}/");
        let entries = self
            .op
            .list_with(&prefix)
            .recursive(true)
            .await
            .map_err(to_artifact_error)?;

        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|e| e.metadata().mode() == EntryMode::FILE)
            .filter_map(|e| e.path().strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }
}
