use crate::constants::defaults;
use crate::error::{ConfigurationError, ProvisioningError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Autoscale bounds of a compute cluster.
///
/// Always satisfies `0 <= min_nodes <= max_nodes` and `max_nodes >= 1`, also when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScaleSettings")]
pub struct ScaleSettings {
    min_nodes: u32,
    max_nodes: u32,
    idle_seconds_before_scaledown: u64,
}

#[derive(Deserialize)]
struct RawScaleSettings {
    min_nodes: u32,
    max_nodes: u32,
    #[serde(default = "default_idle")]
    idle_seconds_before_scaledown: u64,
}

fn default_idle() -> u64 {
    defaults::IDLE_SECONDS_BEFORE_SCALEDOWN
}

impl TryFrom<RawScaleSettings> for ScaleSettings {
    type Error = ConfigurationError;

    fn try_from(raw: RawScaleSettings) -> Result<Self, Self::Error> {
        Ok(Self::new(raw.min_nodes, raw.max_nodes)?
            .with_idle_seconds(raw.idle_seconds_before_scaledown))
    }
}

impl ScaleSettings {
    pub fn new(min_nodes: u32, max_nodes: u32) -> Result<Self, ConfigurationError> {
        if max_nodes == 0 {
            return Err(ConfigurationError::InvalidScale(
                "max_nodes must be at least 1".into(),
            ));
        }
        if min_nodes > max_nodes {
            return Err(ConfigurationError::InvalidScale(format!(
                "min_nodes ({min_nodes}) exceeds max_nodes ({max_nodes})"
            )));
        }

        Ok(Self {
            min_nodes,
            max_nodes,
            idle_seconds_before_scaledown: defaults::IDLE_SECONDS_BEFORE_SCALEDOWN,
        })
    }

    /// Bounds `[0, max_nodes]`, the cluster scales down to nothing when idle.
    pub fn autoscale(max_nodes: u32) -> Result<Self, ConfigurationError> {
        Self::new(0, max_nodes)
    }

    pub fn with_idle_seconds(mut self, seconds: u64) -> Self {
        self.idle_seconds_before_scaledown = seconds;
        self
    }

    pub fn min_nodes(&self) -> u32 {
        self.min_nodes
    }

    pub fn max_nodes(&self) -> u32 {
        self.max_nodes
    }

    pub fn idle_seconds_before_scaledown(&self) -> u64 {
        self.idle_seconds_before_scaledown
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmPriority {
    #[default]
    Dedicated,
    LowPriority,
}

/// A request to create a compute cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub vm_size: String,
    pub scale: ScaleSettings,
    #[serde(default)]
    pub vm_priority: VmPriority,
}

impl ClusterSpec {
    pub fn new(
        name: impl Into<String>,
        vm_size: impl Into<String>,
        max_nodes: u32,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigurationError::Missing("cluster_name"));
        }

        Ok(Self {
            name,
            vm_size: vm_size.into(),
            scale: ScaleSettings::autoscale(max_nodes)?,
            vm_priority: VmPriority::Dedicated,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Creating,
    Succeeded,
    Failed,
    Canceled,
    Unknown,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    Steady,
    Resizing,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub current: u32,
    #[serde(default)]
    pub idle: u32,
    #[serde(default)]
    pub running: u32,
    #[serde(default)]
    pub preparing: u32,
    #[serde(default)]
    pub leaving: u32,
    #[serde(default)]
    pub unusable: u32,
}

/// A snapshot of a compute cluster as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeClusterHandle {
    pub name: String,
    pub vm_size: String,
    pub scale: ScaleSettings,
    #[serde(default)]
    pub vm_priority: VmPriority,
    pub provisioning_state: ProvisioningState,
    pub allocation_state: AllocationState,
    #[serde(default)]
    pub nodes: NodeCounts,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Errors the platform attached to the cluster, if any.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ComputeClusterHandle {
    /// Checks `min <= current <= max` for this snapshot.
    pub fn check_bounds(&self) -> Result<(), ProvisioningError> {
        let current = self.nodes.current;
        let (min, max) = (self.scale.min_nodes(), self.scale.max_nodes());

        if current < min || current > max {
            return Err(ProvisioningError::BoundsViolated {
                name: self.name.clone(),
                detail: format!("current={current}, bounds=[{min}, {max}]"),
            });
        }

        Ok(())
    }

    /// Whether the existing cluster has the VM size and bounds `spec` asks for.
    pub fn matches(&self, spec: &ClusterSpec) -> bool {
        self.vm_size.eq_ignore_ascii_case(&spec.vm_size)
            && self.scale.min_nodes() == spec.scale.min_nodes()
            && self.scale.max_nodes() == spec.scale.max_nodes()
    }

    pub fn failure_reason(&self) -> String {
        if self.errors.is_empty() {
            "no error reported".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}
