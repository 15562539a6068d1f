use finch_core::prelude::*;
use finch_fs::{atomic_write, safe_join};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// What to do when a requested artifact does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalPolicy {
    /// Download everything that exists and report the rest.
    #[default]
    CollectAll,
    /// Stop at the first missing artifact.
    FailFast,
}

impl FromStr for RetrievalPolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "collect-all" | "collect_all" => Ok(Self::CollectAll),
            "fail-fast" | "fail_fast" => Ok(Self::FailFast),
            other => Err(ConfigurationError::Invalid(format!(
                "unknown retrieval policy '{other}', expected collect-all or fail-fast"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Local paths of the files written.
    pub downloaded: Vec<PathBuf>,
    /// Artifact paths the run did not produce.
    pub missing: Vec<String>,
}

impl DownloadReport {
    pub fn ensure_complete(&self) -> Result<(), ArtifactError> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ArtifactError::Missing(self.missing.clone()))
        }
    }
}

/// Copies named run artifacts to a local directory, preserving their relative paths.
#[derive(Clone)]
pub struct ResultRetriever<A: ArtifactStore> {
    store: A,
    policy: RetrievalPolicy,
}

impl<A: ArtifactStore> ResultRetriever<A> {
    pub fn new(store: A) -> Self {
        Self {
            store,
            policy: RetrievalPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetrievalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Downloads `artifacts` of `run` below `dest`. Existing files are overwritten.
    ///
    /// Files already written stay on disk when a later artifact fails.
    pub async fn download(
        &self,
        run: &RunHandle,
        dest: &Path,
        artifacts: &[String],
    ) -> Result<DownloadReport, ArtifactError> {
        let mut report = DownloadReport::default();

        for artifact in artifacts {
            let target = safe_join(dest, artifact)?;

            let data = match self.store.fetch(&run.id, artifact).await {
                Ok(data) => data,
                Err(ArtifactError::NotFound(path)) => match self.policy {
                    RetrievalPolicy::FailFast => return Err(ArtifactError::NotFound(path)),
                    RetrievalPolicy::CollectAll => {
                        warn!("Run {} has no artifact {artifact}", run.id);
                        report.missing.push(artifact.clone());
                        continue;
                    }
                },
                Err(e) => return Err(e),
            };

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            atomic_write(&target, data).await?;
            info!("Downloaded {artifact} to {}", target.display());
            report.downloaded.push(target);
        }

        Ok(report)
    }

    /// Lists the run's artifacts, then downloads all of them.
    pub async fn download_all(&self, run: &RunHandle, dest: &Path) -> Result<DownloadReport, ArtifactError> {
        let artifacts = self.store.list(&run.id).await?;
        self.download(run, dest, &artifacts).await
    }
}
