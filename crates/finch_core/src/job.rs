use crate::constants::defaults;
use crate::error::SubmissionError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters passed to the entry-point script on every worker.
///
/// Rendered in a fixed order: `--seed`, `--epochs`, `--no-cuda` (only when set), `--data_percent_used`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptArgs {
    pub seed: u64,
    pub epochs: u32,
    pub no_cuda: bool,
    /// Fraction of the dataset to train and evaluate on, in `(0, 1]`.
    pub data_percent_used: f64,
}

impl Default for ScriptArgs {
    fn default() -> Self {
        Self {
            seed: 42,
            epochs: 2,
            no_cuda: false,
            data_percent_used: 1.0,
        }
    }
}

impl ScriptArgs {
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.epochs == 0 {
            return Err(SubmissionError::InvalidDescriptor(
                "--epochs must be >= 1".into(),
            ));
        }
        if !self.data_percent_used.is_finite()
            || self.data_percent_used <= 0.0
            || self.data_percent_used > 1.0
        {
            return Err(SubmissionError::InvalidDescriptor(format!(
                "--data_percent_used must be in (0, 1], got {}",
                self.data_percent_used
            )));
        }
        Ok(())
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--seed".to_string(),
            self.seed.to_string(),
            "--epochs".to_string(),
            self.epochs.to_string(),
        ];
        if self.no_cuda {
            args.push("--no-cuda".to_string());
        }
        args.push("--data_percent_used".to_string());
        args.push(format!("{:?}", self.data_percent_used));
        args
    }

    /// Parses the script's flag surface. Accepts both `--flag value` and `--flag=value`.
    #[cfg(test)]
    fn from_args<I, S>(args: I) -> Result<Self, SubmissionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Self::default();
        let mut iter = args.into_iter().map(|a| a.as_ref().to_string());

        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((f, v)) => (f.to_string(), Some(v.to_string())),
                None => (arg, None),
            };

            if flag == "--no-cuda" {
                parsed.no_cuda = true;
                continue;
            }

            let mut value = || {
                inline.clone().or_else(|| iter.next()).ok_or_else(|| {
                    SubmissionError::InvalidDescriptor(format!("{flag} expects a value"))
                })
            };
            let invalid =
                |v: &str| SubmissionError::InvalidDescriptor(format!("invalid value '{v}' for {flag}"));

            match flag.as_str() {
                "--seed" => {
                    let v = value()?;
                    parsed.seed = v.parse().map_err(|_| invalid(&v))?;
                }
                "--epochs" => {
                    let v = value()?;
                    parsed.epochs = v.parse().map_err(|_| invalid(&v))?;
                }
                "--data_percent_used" => {
                    let v = value()?;
                    parsed.data_percent_used = v.parse().map_err(|_| invalid(&v))?;
                }
                other => {
                    return Err(SubmissionError::InvalidDescriptor(format!(
                        "unknown script flag {other}"
                    )));
                }
            }
        }

        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    PyTorch,
}

/// How worker processes are launched and wired together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// One MPI rank per process (Horovod).
    #[default]
    Mpi,
    /// torch.distributed with the NCCL backend.
    Nccl,
}

/// Packages installed on the workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Environment-level packages.
    #[serde(default)]
    pub conda_packages: Vec<String>,
    /// Script-level packages.
    #[serde(default)]
    pub pip_packages: Vec<String>,
}

impl Dependencies {
    pub fn xnli_defaults() -> Self {
        Self {
            conda_packages: defaults::CONDA_PACKAGES.iter().map(|p| p.to_string()).collect(),
            pip_packages: defaults::PIP_PACKAGES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Everything needed to launch a distributed training job. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub experiment: String,
    /// Path of the entry-point script, relative to the snapshot root.
    pub entry_script: String,
    pub script_args: ScriptArgs,
    pub node_count: u32,
    pub processes_per_node: u32,
    pub framework: Framework,
    pub framework_version: String,
    pub distribution: Distribution,
    pub use_gpu: bool,
    pub dependencies: Dependencies,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl JobDescriptor {
    pub fn new(experiment: impl Into<String>, entry_script: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
            entry_script: entry_script.into(),
            script_args: ScriptArgs::default(),
            node_count: defaults::NODE_COUNT,
            processes_per_node: defaults::PROCESSES_PER_NODE,
            framework: Framework::PyTorch,
            framework_version: defaults::FRAMEWORK_VERSION.to_string(),
            distribution: Distribution::Mpi,
            use_gpu: true,
            dependencies: Dependencies::xnli_defaults(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_topology(mut self, node_count: u32, processes_per_node: u32) -> Self {
        self.node_count = node_count;
        self.processes_per_node = processes_per_node;
        self
    }

    pub fn with_script_args(mut self, args: ScriptArgs) -> Self {
        self.script_args = args;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Number of worker processes across the whole job.
    pub fn total_processes(&self) -> u32 {
        self.node_count.saturating_mul(self.processes_per_node)
    }

    /// Validates the descriptor against the target cluster's node ceiling.
    pub fn validate(&self, max_nodes: u32) -> Result<(), SubmissionError> {
        if self.experiment.trim().is_empty() {
            return Err(SubmissionError::InvalidDescriptor(
                "experiment name is required".into(),
            ));
        }
        if self.entry_script.trim().is_empty() {
            return Err(SubmissionError::InvalidDescriptor(
                "entry script is required".into(),
            ));
        }
        if self.node_count == 0 || self.processes_per_node == 0 {
            return Err(SubmissionError::InvalidDescriptor(
                "node_count and processes_per_node must be >= 1".into(),
            ));
        }
        if self.node_count > max_nodes {
            return Err(SubmissionError::InvalidDescriptor(format!(
                "node_count ({}) exceeds the cluster maximum ({max_nodes})",
                self.node_count
            )));
        }
        self.script_args.validate()
    }
}

/// The wire form of a submission: descriptor, target and the uploaded snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub descriptor: JobDescriptor,
    pub compute_target: String,
    pub snapshot_id: String,
    /// The rendered script arguments, in order.
    pub arguments: Vec<String>,
}

impl JobSubmission {
    pub fn new(
        descriptor: JobDescriptor,
        compute_target: impl Into<String>,
        snapshot_id: impl Into<String>,
    ) -> Self {
        let arguments = descriptor.script_args.to_args();
        Self {
            descriptor,
            compute_target: compute_target.into(),
            snapshot_id: snapshot_id.into(),
            arguments,
        }
    }
}
