use bytes::Bytes;
use finch_core::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info};

/// Uploads a staged snapshot and submits a job against a ready cluster.
#[derive(Clone)]
pub struct JobSubmitter<J: JobBackend> {
    backend: J,
}

impl<J: JobBackend> JobSubmitter<J> {
    pub fn new(backend: J) -> Self {
        Self { backend }
    }

    /// Validates `descriptor`, uploads `snapshot` and submits. Returns once the platform accepted the run.
    pub async fn submit(
        &self,
        workspace: &WorkspaceHandle,
        cluster: &ComputeClusterHandle,
        descriptor: JobDescriptor,
        snapshot: &Snapshot,
    ) -> Result<RunHandle, SubmissionError> {
        descriptor.validate(cluster.scale.max_nodes())?;
        if !snapshot.manifest.contains(&descriptor.entry_script) {
            return Err(SubmissionError::InvalidDescriptor(format!(
                "entry script {} is not part of the snapshot",
                descriptor.entry_script
            )));
        }

        let snapshot_id = self.upload_snapshot(snapshot).await?;
        let submission = JobSubmission::new(descriptor, &cluster.name, snapshot_id);

        info!(
            "Submitting {} to {} ({} nodes x {} processes, args: {})",
            submission.descriptor.entry_script,
            submission.compute_target,
            submission.descriptor.node_count,
            submission.descriptor.processes_per_node,
            submission.arguments.join(" ")
        );
        let run = self.backend.submit(workspace, &submission).await?;
        info!("Run {} accepted in experiment {}", run.id, run.experiment);

        Ok(run)
    }

    /// Uploads every blob the platform does not have yet, then registers the manifest.
    pub async fn upload_snapshot(&self, snapshot: &Snapshot) -> Result<String, SubmissionError> {
        let mut seen = HashSet::new();
        let mut uploaded = 0usize;

        for (path, entry) in &snapshot.manifest.files {
            if !seen.insert(entry.hash.as_str()) {
                continue;
            }
            if self.backend.has_blob(&entry.hash).await? {
                debug!("Blob for {path} already present");
                continue;
            }

            let data = tokio::fs::read(snapshot.root.join(path)).await?;
            self.backend.upload_blob(&entry.hash, Bytes::from(data)).await?;
            uploaded += 1;
        }

        let id = self.backend.register_snapshot(&snapshot.manifest).await?;
        info!(
            "Registered snapshot {id} ({uploaded} of {} files uploaded)",
            snapshot.manifest.files.len()
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finch_fs::JobPackager;
    use finch_platform_mock::InMemoryPlatform;
    use std::fs;

    fn workspace() -> WorkspaceHandle {
        WorkspaceHandle {
            subscription_id: "sub".into(),
            resource_group: "rg".into(),
            workspace_name: "ws".into(),
            region: "eastus".into(),
        }
    }

    fn cluster() -> ComputeClusterHandle {
        ComputeClusterHandle {
            name: "gpucluster".into(),
            vm_size: "STANDARD_NC6".into(),
            scale: ScaleSettings::autoscale(2).unwrap(),
            vm_priority: VmPriority::Dedicated,
            provisioning_state: ProvisioningState::Succeeded,
            allocation_state: AllocationState::Steady,
            nodes: NodeCounts::default(),
            created_at: None,
            modified_at: None,
            errors: vec![],
        }
    }

    async fn staged(dir: &std::path::Path) -> Snapshot {
        fs::create_dir_all(dir.join("utils_nlp")).unwrap();
        fs::write(dir.join("utils_nlp/__init__.py"), "").unwrap();
        fs::write(dir.join("utils_nlp/empty.py"), "").unwrap();
        fs::write(dir.join("train.py"), "print('train')").unwrap();

        JobPackager::new(dir.join("utils_nlp"), dir.join("train.py"), dir.join("project"))
            .package()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submits_with_rendered_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = staged(dir.path()).await;
        let ws = workspace();
        let platform = InMemoryPlatform::new().with_cluster(&ws, cluster());

        let run = JobSubmitter::new(platform.clone())
            .submit(&ws, &cluster(), JobDescriptor::new("exp", "train.py"), &snapshot)
            .await
            .unwrap();

        assert_eq!(run.status(), &RunStatus::Queued);
        let submission = platform.submission(&run.id).unwrap();
        assert_eq!(submission.compute_target, "gpucluster");
        assert_eq!(
            submission.arguments,
            vec!["--seed", "42", "--epochs", "2", "--data_percent_used", "1.0"]
        );
        assert!(platform.snapshot(&submission.snapshot_id).is_some());
    }

    #[tokio::test]
    async fn identical_blobs_are_uploaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = staged(dir.path()).await;
        let platform = InMemoryPlatform::new();
        let submitter = JobSubmitter::new(platform.clone());

        // Two empty files share a hash.
        submitter.upload_snapshot(&snapshot).await.unwrap();
        assert_eq!(platform.stats().blobs_uploaded, 2);

        submitter.upload_snapshot(&snapshot).await.unwrap();
        assert_eq!(platform.stats().blobs_uploaded, 2);
    }

    #[tokio::test]
    async fn too_many_nodes_is_rejected_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = staged(dir.path()).await;
        let platform = InMemoryPlatform::new();

        let result = JobSubmitter::new(platform.clone())
            .submit(
                &workspace(),
                &cluster(),
                JobDescriptor::new("exp", "train.py").with_topology(3, 1),
                &snapshot,
            )
            .await;

        assert!(matches!(result, Err(SubmissionError::InvalidDescriptor(_))));
        assert_eq!(platform.stats().blobs_uploaded, 0);
    }

    #[tokio::test]
    async fn entry_script_must_be_in_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = staged(dir.path()).await;

        let result = JobSubmitter::new(InMemoryPlatform::new())
            .submit(&workspace(), &cluster(), JobDescriptor::new("exp", "missing.py"), &snapshot)
            .await;

        assert!(matches!(result, Err(SubmissionError::InvalidDescriptor(_))));
    }

    #[tokio::test]
    async fn invalid_script_args_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = staged(dir.path()).await;
        let args = ScriptArgs {
            data_percent_used: 0.0,
            ..Default::default()
        };

        let result = JobSubmitter::new(InMemoryPlatform::new())
            .submit(
                &workspace(),
                &cluster(),
                JobDescriptor::new("exp", "train.py").with_script_args(args),
                &snapshot,
            )
            .await;

        assert!(matches!(result, Err(SubmissionError::InvalidDescriptor(_))));
    }
}
