use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A single file of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// SHA-256 of the file contents, hex encoded.
    pub hash: String,
    pub size: u64,
}

/// Maps snapshot-relative paths (always `/`-separated) to content hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub files: BTreeMap<String, SnapshotEntry>,
}

impl SnapshotManifest {
    /// Content address of the whole snapshot. Independent of insertion order.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, entry) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update(entry.hash.as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn total_size(&self) -> u64 {
        self.files.values().map(|e| e.size).sum()
    }
}

/// A staged directory and its manifest, ready to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub root: PathBuf,
    pub manifest: SnapshotManifest,
}

impl Snapshot {
    pub fn id(&self) -> String {
        self.manifest.id()
    }
}
