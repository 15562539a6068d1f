use crate::compute::*;
use crate::error::*;
use crate::job::*;
use crate::run::*;
use crate::snapshot::*;
use crate::workspace::*;

use bytes::Bytes;
use futures::stream::BoxStream;

/// Locates and creates workspaces.
pub trait WorkspaceBackend: Send + Sync + 'static + Clone {
    /// Looks a workspace up by identity. [`None`] if it does not exist.
    fn get_workspace(
        &self,
        identity: &WorkspaceIdentity,
    ) -> impl Future<Output = Result<Option<WorkspaceHandle>, PlatformError>> + Send;

    /// Creates a workspace, and its resource group if absent, in `region`.
    fn create_workspace(
        &self,
        identity: &WorkspaceIdentity,
        region: &str,
    ) -> impl Future<Output = Result<WorkspaceHandle, PlatformError>> + Send;
}

/// Manages compute clusters inside a workspace.
pub trait ComputeBackend: Send + Sync + 'static + Clone {
    /// Looks a cluster up by name. [`None`] if it does not exist.
    fn get_cluster(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> impl Future<Output = Result<Option<ComputeClusterHandle>, ProvisioningError>> + Send;

    /// Issues a create request. Returns as soon as the platform accepted it.
    fn create_cluster(
        &self,
        workspace: &WorkspaceHandle,
        spec: &ClusterSpec,
    ) -> impl Future<Output = Result<ComputeClusterHandle, ProvisioningError>> + Send;

    /// Returns a fresh snapshot of the cluster's state.
    fn cluster_status(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> impl Future<Output = Result<ComputeClusterHandle, ProvisioningError>> + Send {
        async move {
            self.get_cluster(workspace, name)
                .await?
                .ok_or_else(|| ProvisioningError::NotFound(name.to_string()))
        }
    }
}

/// Accepts snapshots and job submissions and reports on runs.
pub trait JobBackend: Send + Sync + 'static + Clone {
    /// Checks if a snapshot blob is already stored on the platform.
    fn has_blob(&self, hash: &str) -> impl Future<Output = Result<bool, SubmissionError>> + Send;

    /// Uploads a snapshot blob.
    fn upload_blob(
        &self,
        hash: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<(), SubmissionError>> + Send;

    /// Registers a manifest whose blobs were all uploaded. Returns the snapshot id.
    fn register_snapshot(
        &self,
        manifest: &SnapshotManifest,
    ) -> impl Future<Output = Result<String, SubmissionError>> + Send;

    /// Submits a job. Returns as soon as the platform accepted it.
    fn submit(
        &self,
        workspace: &WorkspaceHandle,
        submission: &JobSubmission,
    ) -> impl Future<Output = Result<RunHandle, SubmissionError>> + Send;

    /// Returns the platform's current view of a run.
    fn run_details(&self, run_id: &str) -> impl Future<Output = Result<RunDetails, RunError>> + Send;

    /// Optional: Streams the run's driver logs until the run ends.
    fn logs(
        &self,
        _run_id: &str,
    ) -> impl Future<Output = Result<BoxStream<'static, Result<LogOutput, RunError>>, RunError>> + Send
    {
        async {
            Err(RunError::Unsupported(
                "Log streaming not supported by this backend".into(),
            ))
        }
    }
}

/// Read access to the output files of runs.
pub trait ArtifactStore: Send + Sync + 'static + Clone {
    /// Reads an artifact, `path` is relative to the run's output root (e.g. `outputs/results.json`).
    fn fetch(
        &self,
        run_id: &str,
        path: &str,
    ) -> impl Future<Output = Result<Bytes, ArtifactError>> + Send;

    /// Optional: Lists the artifacts of a run.
    fn list(&self, _run_id: &str) -> impl Future<Output = Result<Vec<String>, ArtifactError>> + Send {
        async {
            Err(ArtifactError::Unsupported(
                "Listing not supported by this store".into(),
            ))
        }
    }

    /// Returns the storage path of an artifact.
    fn get_artifact_path(&self, run_id: &str, path: &str) -> String {
        format!("{run_id}/{}", path.trim_start_matches('/'))
    }
}

/// The set of platform backends the orchestration runs against.
pub trait PlatformServices: Send + Sync + 'static + Clone {
    type Workspace: WorkspaceBackend;
    type Compute: ComputeBackend;
    type Jobs: JobBackend;
    type Artifacts: ArtifactStore;

    fn workspace(&self) -> &Self::Workspace;
    fn compute(&self) -> &Self::Compute;
    fn jobs(&self) -> &Self::Jobs;
    fn artifacts(&self) -> &Self::Artifacts;
}
