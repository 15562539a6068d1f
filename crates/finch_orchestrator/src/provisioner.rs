use finch_core::prelude::*;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Gets or creates a compute cluster and waits until it is usable.
#[derive(Clone)]
pub struct ComputeProvisioner<C: ComputeBackend> {
    backend: C,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl<C: ComputeBackend> ComputeProvisioner<C> {
    pub fn new(backend: C) -> Self {
        Self {
            backend,
            poll_interval: Duration::from_secs(defaults::PROVISION_POLL_SECS),
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Gives up waiting after `timeout`. Without one the wait is unbounded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the named cluster, creating it from `spec` if absent.
    ///
    /// An existing cluster is returned as-is even if its configuration differs from `spec`.
    pub async fn provision(
        &self,
        workspace: &WorkspaceHandle,
        spec: &ClusterSpec,
    ) -> Result<ComputeClusterHandle, ProvisioningError> {
        if let Some(existing) = self.backend.get_cluster(workspace, &spec.name).await? {
            info!("Found existing compute target {}", existing.name);
            if !existing.matches(spec) {
                warn!(
                    "Compute target {} differs from the requested configuration (vm_size={}, bounds=[{}, {}]), using it unchanged",
                    existing.name,
                    existing.vm_size,
                    existing.scale.min_nodes(),
                    existing.scale.max_nodes()
                );
            }
            return match existing.provisioning_state {
                ProvisioningState::Creating | ProvisioningState::Unknown => {
                    self.wait_for_ready(workspace, &existing.name).await
                }
                _ => ready_or_error(existing),
            };
        }

        info!(
            "Creating compute target {} ({}, max {} nodes)",
            spec.name,
            spec.vm_size,
            spec.scale.max_nodes()
        );
        let created = self.backend.create_cluster(workspace, spec).await?;
        self.wait_for_ready(workspace, &created.name).await
    }

    /// Polls the cluster at the configured interval until provisioning is terminal.
    pub async fn wait_for_ready(
        &self,
        workspace: &WorkspaceHandle,
        name: &str,
    ) -> Result<ComputeClusterHandle, ProvisioningError> {
        let started = Instant::now();

        loop {
            let cluster = self.backend.cluster_status(workspace, name).await?;
            cluster.check_bounds()?;
            debug!(
                "Compute target {name}: {:?}/{:?}, {} nodes",
                cluster.provisioning_state, cluster.allocation_state, cluster.nodes.current
            );

            if cluster.provisioning_state.is_terminal() {
                return ready_or_error(cluster);
            }

            if let Some(timeout) = self.timeout
                && started.elapsed() >= timeout
            {
                return Err(ProvisioningError::Timeout {
                    name: name.to_string(),
                    seconds: timeout.as_secs(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn ready_or_error(cluster: ComputeClusterHandle) -> Result<ComputeClusterHandle, ProvisioningError> {
    match cluster.provisioning_state {
        ProvisioningState::Failed => Err(ProvisioningError::Failed {
            reason: cluster.failure_reason(),
            name: cluster.name,
        }),
        ProvisioningState::Canceled => Err(ProvisioningError::Canceled { name: cluster.name }),
        _ => {
            cluster.check_bounds()?;
            info!("Compute target {} is ready", cluster.name);
            Ok(cluster)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finch_platform_mock::InMemoryPlatform;

    fn workspace() -> WorkspaceHandle {
        WorkspaceHandle {
            subscription_id: "sub".into(),
            resource_group: "rg".into(),
            workspace_name: "ws".into(),
            region: "eastus".into(),
        }
    }

    fn spec() -> ClusterSpec {
        ClusterSpec::new("gpucluster", "STANDARD_NC6", 2).unwrap()
    }

    fn ready_cluster(vm_size: &str, max_nodes: u32) -> ComputeClusterHandle {
        ComputeClusterHandle {
            name: "gpucluster".into(),
            vm_size: vm_size.into(),
            scale: ScaleSettings::autoscale(max_nodes).unwrap(),
            vm_priority: VmPriority::Dedicated,
            provisioning_state: ProvisioningState::Succeeded,
            allocation_state: AllocationState::Steady,
            nodes: NodeCounts::default(),
            created_at: None,
            modified_at: None,
            errors: vec![],
        }
    }

    fn provisioner(platform: &InMemoryPlatform) -> ComputeProvisioner<InMemoryPlatform> {
        ComputeProvisioner::new(platform.clone()).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn creates_and_waits_until_ready() {
        let platform = InMemoryPlatform::new().with_provisioning_polls(3);
        let cluster = provisioner(&platform)
            .provision(&workspace(), &spec())
            .await
            .unwrap();

        assert_eq!(cluster.provisioning_state, ProvisioningState::Succeeded);
        assert_eq!(cluster.scale.max_nodes(), 2);
        assert_eq!(platform.stats().clusters_created, 1);
    }

    #[tokio::test]
    async fn existing_cluster_is_reused_unchanged() {
        let ws = workspace();
        let platform = InMemoryPlatform::new().with_cluster(&ws, ready_cluster("STANDARD_NC12", 4));

        let cluster = provisioner(&platform).provision(&ws, &spec()).await.unwrap();

        assert_eq!(cluster.vm_size, "STANDARD_NC12");
        assert_eq!(cluster.scale.max_nodes(), 4);
        assert_eq!(platform.stats().clusters_created, 0);
    }

    #[tokio::test]
    async fn provisioning_twice_creates_once() {
        let platform = InMemoryPlatform::new();
        let provisioner = provisioner(&platform);
        let ws = workspace();

        let first = provisioner.provision(&ws, &spec()).await.unwrap();
        let second = provisioner.provision(&ws, &spec()).await.unwrap();

        assert_eq!(first.name, second.name);
        assert_eq!(platform.stats().clusters_created, 1);
    }

    #[tokio::test]
    async fn failed_provisioning_is_reported() {
        let platform = InMemoryPlatform::new().with_provisioning_failure("quota exceeded");
        let result = provisioner(&platform).provision(&workspace(), &spec()).await;

        match result {
            Err(ProvisioningError::Failed { name, reason }) => {
                assert_eq!(name, "gpucluster");
                assert!(reason.contains("quota exceeded"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_gives_up_after_timeout() {
        let platform = InMemoryPlatform::new().with_provisioning_polls(u32::MAX);
        let result = provisioner(&platform)
            .with_timeout(Duration::from_millis(20))
            .provision(&workspace(), &spec())
            .await;

        assert!(matches!(result, Err(ProvisioningError::Timeout { .. })));
    }

    #[tokio::test]
    async fn out_of_bounds_cluster_is_rejected() {
        let ws = workspace();
        let mut cluster = ready_cluster("STANDARD_NC6", 2);
        cluster.nodes.current = 5;
        let platform = InMemoryPlatform::new().with_cluster(&ws, cluster);

        assert!(matches!(
            provisioner(&platform).provision(&ws, &spec()).await,
            Err(ProvisioningError::BoundsViolated { .. })
        ));
    }
}
