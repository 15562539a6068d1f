//! # Finch Platform Mock
//! [![Crates.io](https://img.shields.io/crates/v/finch_platform_mock.svg)](https://crates.io/crates/finch_platform_mock)
//! [![Docs](https://docs.rs/finch_platform_mock/badge.svg)](https://docs.rs/finch_platform_mock/)
//!
//! An in-memory ML platform for development and testing.
//!
//! Workspaces, clusters, snapshots and runs live in a shared map. Cluster provisioning and
//! runs advance by one step per status poll, following a configurable script, so the
//! orchestration can be exercised end to end without a network.
//!
//! **WARNING**: Nothing is executed. Runs only replay their status script and expose the
//! artifacts configured up front.
//!
//! ## Usage
//!
//! ```rust
//! # use finch_platform_mock::InMemoryPlatform;
//! # use finch_core::prelude::RunStatus;
//! # fn main() {
//! let platform = InMemoryPlatform::new()
//!     .with_provisioning_polls(2)
//!     .with_run_script(vec![RunStatus::Running, RunStatus::Succeeded])
//!     .with_artifact("outputs/results.json", r#"{"micro avg": {}}"#);
//! # }
//! ```

use bytes::Bytes;
use chrono::Utc;
use finch_core::prelude::*;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Call counters, for asserting on side effects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformStats {
    pub workspaces_created: u32,
    pub clusters_created: u32,
    pub blobs_uploaded: u32,
    pub runs_submitted: u32,
    pub status_polls: u32,
}

struct ClusterState {
    handle: ComputeClusterHandle,
    polls_left: u32,
}

struct RunState {
    script: VecDeque<RunStatus>,
    current: RunStatus,
    submission: JobSubmission,
    started_at: Option<chrono::DateTime<Utc>>,
    ended_at: Option<chrono::DateTime<Utc>>,
}

struct Inner {
    workspaces: HashMap<WorkspaceIdentity, WorkspaceHandle>,
    clusters: HashMap<(WorkspaceIdentity, String), ClusterState>,
    blobs: HashMap<String, Bytes>,
    snapshots: HashMap<String, SnapshotManifest>,
    runs: HashMap<String, RunState>,
    provisioning_polls: u32,
    provisioning_failure: Option<String>,
    run_script: Vec<RunStatus>,
    artifacts: HashMap<String, Bytes>,
    logs: Vec<String>,
    stats: PlatformStats,
}

#[derive(Clone)]
pub struct InMemoryPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                workspaces: HashMap::new(),
                clusters: HashMap::new(),
                blobs: HashMap::new(),
                snapshots: HashMap::new(),
                runs: HashMap::new(),
                provisioning_polls: 1,
                provisioning_failure: None,
                run_script: vec![RunStatus::Running, RunStatus::Succeeded],
                artifacts: HashMap::new(),
                logs: Vec::new(),
                stats: PlatformStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call, the maps are still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of status polls a new cluster stays in `Creating`.
    pub fn with_provisioning_polls(self, polls: u32) -> Self {
        self.lock().provisioning_polls = polls;
        self
    }

    /// New clusters end in `Failed` with `reason`.
    pub fn with_provisioning_failure(self, reason: impl Into<String>) -> Self {
        self.lock().provisioning_failure = Some(reason.into());
        self
    }

    /// Statuses reported by successive polls of every new run. The last one repeats.
    pub fn with_run_script(self, script: Vec<RunStatus>) -> Self {
        self.lock().run_script = script;
        self
    }

    /// An output file every run exposes.
    pub fn with_artifact(self, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.lock().artifacts.insert(path.into(), data.into());
        self
    }

    /// Driver log lines every run streams.
    pub fn with_logs(self, lines: Vec<String>) -> Self {
        self.lock().logs = lines;
        self
    }

    /// Pre-registers a workspace.
    pub fn with_workspace(self, handle: WorkspaceHandle) -> Self {
        self.lock().workspaces.insert(handle.identity(), handle);
        self
    }

    /// Pre-registers a ready cluster.
    pub fn with_cluster(self, workspace: &WorkspaceHandle, handle: ComputeClusterHandle) -> Self {
        self.lock().clusters.insert(
            (workspace.identity(), handle.name.clone()),
            ClusterState {
                handle,
                polls_left: 0,
            },
        );
        self
    }

    pub fn stats(&self) -> PlatformStats {
        self.lock().stats.clone()
    }

    /// The submission a run was created from.
    pub fn submission(&self, run_id: &str) -> Option<JobSubmission> {
        self.lock().runs.get(run_id).map(|r| r.submission.clone())
    }

    pub fn snapshot(&self, id: &str) -> Option<SnapshotManifest> {
        self.lock().snapshots.get(id).cloned()
    }
}

impl WorkspaceBackend for InMemoryPlatform {
    async fn get_workspace(
        &self,
        identity: &WorkspaceIdentity,
    ) -> Result<Option<WorkspaceHandle>, PlatformError> {
        Ok(self.lock().workspaces.get(identity).cloned())
    }

    async fn create_workspace(
        &self,
        identity: &WorkspaceIdentity,
        region: &str,
    ) -> Result<WorkspaceHandle, PlatformError> {
        let mut inner = self.lock();
        if inner.workspaces.contains_key(identity) {
            return Err(PlatformError::InvalidRequest(format!(
                "Workspace {} already exists",
                identity.workspace_name
            )));
        }

        let handle = WorkspaceHandle {
            subscription_id: identity.subscription_id.clone(),
            resource_group: identity.resource_group.clone(),
            workspace_name: identity.workspace_name.clone(),
            region: region.to_string(),
        };
        inner.workspaces.insert(identity.clone(), handle.clone());
        inner.stats.workspaces_created += 1;
        Ok(handle)
    }
}

impl ComputeBackend for InMemoryPlatform {
    async fn get_cluster(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> Result<Option<ComputeClusterHandle>, ProvisioningError> {
        let key = (workspace.identity(), name.to_string());
        Ok(self.lock().clusters.get(&key).map(|c| c.handle.clone()))
    }

    async fn create_cluster(
        &self,
        workspace: &WorkspaceHandle,
        spec: &ClusterSpec,
    ) -> Result<ComputeClusterHandle, ProvisioningError> {
        let mut inner = self.lock();
        let key = (workspace.identity(), spec.name.clone());
        if inner.clusters.contains_key(&key) {
            return Err(ProvisioningError::System(format!(
                "Cluster {} already exists",
                spec.name
            )));
        }

        let now = Utc::now();
        let handle = ComputeClusterHandle {
            name: spec.name.clone(),
            vm_size: spec.vm_size.clone(),
            scale: spec.scale,
            vm_priority: spec.vm_priority,
            provisioning_state: ProvisioningState::Creating,
            allocation_state: AllocationState::Resizing,
            nodes: NodeCounts {
                current: spec.scale.min_nodes(),
                ..Default::default()
            },
            created_at: Some(now),
            modified_at: Some(now),
            errors: Vec::new(),
        };

        let polls_left = inner.provisioning_polls;
        inner.clusters.insert(
            key,
            ClusterState {
                handle: handle.clone(),
                polls_left,
            },
        );
        inner.stats.clusters_created += 1;
        Ok(handle)
    }

    async fn cluster_status(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> Result<ComputeClusterHandle, ProvisioningError> {
        let mut inner = self.lock();
        let failure = inner.provisioning_failure.clone();
        let key = (workspace.identity(), name.to_string());
        let cluster = inner
            .clusters
            .get_mut(&key)
            .ok_or_else(|| ProvisioningError::NotFound(name.to_string()))?;

        if cluster.handle.provisioning_state == ProvisioningState::Creating {
            cluster.polls_left = cluster.polls_left.saturating_sub(1);
            if cluster.polls_left == 0 {
                match failure {
                    Some(reason) => {
                        cluster.handle.provisioning_state = ProvisioningState::Failed;
                        cluster.handle.errors.push(reason);
                    }
                    None => {
                        cluster.handle.provisioning_state = ProvisioningState::Succeeded;
                        cluster.handle.allocation_state = AllocationState::Steady;
                    }
                }
                cluster.handle.modified_at = Some(Utc::now());
            }
        }

        Ok(cluster.handle.clone())
    }
}

impl JobBackend for InMemoryPlatform {
    async fn has_blob(&self, hash: &str) -> Result<bool, SubmissionError> {
        Ok(self.lock().blobs.contains_key(hash))
    }

    async fn upload_blob(&self, hash: &str, data: Bytes) -> Result<(), SubmissionError> {
        let mut inner = self.lock();
        inner.blobs.insert(hash.to_string(), data);
        inner.stats.blobs_uploaded += 1;
        Ok(())
    }

    async fn register_snapshot(&self, manifest: &SnapshotManifest) -> Result<String, SubmissionError> {
        let mut inner = self.lock();
        if let Some((path, _)) = manifest
            .files
            .iter()
            .find(|(_, e)| !inner.blobs.contains_key(&e.hash))
        {
            return Err(SubmissionError::Rejected(format!(
                "Blob for {path} was never uploaded"
            )));
        }

        let id = manifest.id();
        inner.snapshots.insert(id.clone(), manifest.clone());
        Ok(id)
    }

    async fn submit(
        &self,
        workspace: &WorkspaceHandle,
        submission: &JobSubmission,
    ) -> Result<RunHandle, SubmissionError> {
        let mut inner = self.lock();

        let snapshot = inner.snapshots.get(&submission.snapshot_id).ok_or_else(|| {
            SubmissionError::Rejected(format!("Unknown snapshot {}", submission.snapshot_id))
        })?;
        if !snapshot.contains(&submission.descriptor.entry_script) {
            return Err(SubmissionError::Rejected(format!(
                "Entry script {} is not part of the snapshot",
                submission.descriptor.entry_script
            )));
        }

        let cluster_key = (workspace.identity(), submission.compute_target.clone());
        if !inner.clusters.contains_key(&cluster_key) {
            return Err(SubmissionError::Rejected(format!(
                "Unknown compute target {}",
                submission.compute_target
            )));
        }

        let run = RunHandle::new(
            format!("{}_{}", submission.descriptor.experiment, uuid::Uuid::new_v4()),
            submission.descriptor.experiment.clone(),
            workspace.clone(),
        );

        let script = inner.run_script.iter().cloned().collect();
        inner.runs.insert(
            run.id.clone(),
            RunState {
                script,
                current: RunStatus::Queued,
                submission: submission.clone(),
                started_at: None,
                ended_at: None,
            },
        );
        inner.stats.runs_submitted += 1;
        debug!("Accepted run {}", run.id);

        Ok(run)
    }

    async fn run_details(&self, run_id: &str) -> Result<RunDetails, RunError> {
        let mut inner = self.lock();
        inner.stats.status_polls += 1;
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;

        let next = if run.script.len() > 1 {
            run.script.pop_front()
        } else {
            run.script.front().cloned()
        };

        if let Some(status) = next {
            if status != RunStatus::Queued && run.started_at.is_none() {
                run.started_at = Some(Utc::now());
            }
            if status.is_terminal() && run.ended_at.is_none() {
                run.ended_at = Some(Utc::now());
            }
            run.current = status;
        }

        Ok(RunDetails {
            id: run_id.to_string(),
            status: run.current.clone(),
            started_at: run.started_at,
            ended_at: run.ended_at,
        })
    }

    async fn logs(
        &self,
        run_id: &str,
    ) -> Result<BoxStream<'static, Result<LogOutput, RunError>>, RunError> {
        let inner = self.lock();
        if !inner.runs.contains_key(run_id) {
            return Err(RunError::NotFound(run_id.to_string()));
        }

        let lines: Vec<_> = inner
            .logs
            .iter()
            .map(|line| {
                Ok(LogOutput {
                    source: LogSource::Stdout,
                    timestamp: Some(Utc::now().to_rfc3339()),
                    message: format!("{line}\n"),
                })
            })
            .collect();

        Ok(stream::iter(lines).boxed())
    }
}

impl ArtifactStore for InMemoryPlatform {
    async fn fetch(&self, run_id: &str, path: &str) -> Result<Bytes, ArtifactError> {
        let inner = self.lock();
        if !inner.runs.contains_key(run_id) {
            return Err(ArtifactError::System(format!("Run {run_id} not found")));
        }

        inner
            .artifacts
            .get(path.trim_start_matches('/'))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<String>, ArtifactError> {
        let inner = self.lock();
        if !inner.runs.contains_key(run_id) {
            return Err(ArtifactError::System(format!("Run {run_id} not found")));
        }

        let mut names: Vec<_> = inner.artifacts.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl PlatformServices for InMemoryPlatform {
    type Workspace = Self;
    type Compute = Self;
    type Jobs = Self;
    type Artifacts = Self;

    fn workspace(&self) -> &Self {
        self
    }
    fn compute(&self) -> &Self {
        self
    }
    fn jobs(&self) -> &Self {
        self
    }
    fn artifacts(&self) -> &Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> WorkspaceHandle {
        WorkspaceHandle {
            subscription_id: "sub".into(),
            resource_group: "rg".into(),
            workspace_name: "ws".into(),
            region: "eastus".into(),
        }
    }

    #[tokio::test]
    async fn cluster_becomes_ready_after_configured_polls() {
        let platform = InMemoryPlatform::new().with_provisioning_polls(2);
        let ws = workspace();
        let spec = ClusterSpec::new("gpucluster", "STANDARD_NC6", 2).unwrap();

        let created = platform.create_cluster(&ws, &spec).await.unwrap();
        assert_eq!(created.provisioning_state, ProvisioningState::Creating);

        let first = platform.cluster_status(&ws, "gpucluster").await.unwrap();
        assert_eq!(first.provisioning_state, ProvisioningState::Creating);
        let second = platform.cluster_status(&ws, "gpucluster").await.unwrap();
        assert_eq!(second.provisioning_state, ProvisioningState::Succeeded);
        assert_eq!(second.allocation_state, AllocationState::Steady);
    }

    #[tokio::test]
    async fn run_replays_script_and_repeats_last_status() {
        let ws = workspace();
        let platform = InMemoryPlatform::new()
            .with_cluster(&ws, {
                let spec = ClusterSpec::new("c", "vm", 1).unwrap();
                ComputeClusterHandle {
                    name: spec.name,
                    vm_size: spec.vm_size,
                    scale: spec.scale,
                    vm_priority: spec.vm_priority,
                    provisioning_state: ProvisioningState::Succeeded,
                    allocation_state: AllocationState::Steady,
                    nodes: NodeCounts::default(),
                    created_at: None,
                    modified_at: None,
                    errors: vec![],
                }
            })
            .with_run_script(vec![RunStatus::Running, RunStatus::Succeeded]);

        let mut manifest = SnapshotManifest::default();
        manifest.files.insert(
            "train.py".into(),
            SnapshotEntry {
                hash: "h".into(),
                size: 1,
            },
        );
        assert!(platform.register_snapshot(&manifest).await.is_err());
        platform.upload_blob("h", Bytes::from_static(b"x")).await.unwrap();
        let snapshot_id = platform.register_snapshot(&manifest).await.unwrap();

        let submission = JobSubmission::new(JobDescriptor::new("exp", "train.py"), "c", snapshot_id);
        let run = platform.submit(&ws, &submission).await.unwrap();

        let statuses = [
            platform.run_details(&run.id).await.unwrap().status,
            platform.run_details(&run.id).await.unwrap().status,
            platform.run_details(&run.id).await.unwrap().status,
        ];
        assert_eq!(
            statuses,
            [RunStatus::Running, RunStatus::Succeeded, RunStatus::Succeeded]
        );
        assert_eq!(platform.stats().runs_submitted, 1);
    }
}
