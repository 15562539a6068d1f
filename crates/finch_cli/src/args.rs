use crate::config::FileConfig;

use anyhow::{Context, Result, bail};
use clap::Args;
use finch_core::prelude::*;
use finch_orchestrator::{PipelineConfig, RetrievalPolicy};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone, Default)]
pub struct WorkspaceArgs {
    /// Azure subscription id
    #[arg(long, env = "FINCH_SUBSCRIPTION_ID")]
    pub subscription_id: Option<String>,

    #[arg(long, env = "FINCH_RESOURCE_GROUP")]
    pub resource_group: Option<String>,

    #[arg(long, env = "FINCH_WORKSPACE_NAME")]
    pub workspace_name: Option<String>,

    /// Region used when the workspace has to be created
    #[arg(long, env = "FINCH_REGION")]
    pub region: Option<String>,

    /// Workspace credential file, its values take precedence over the flags above
    #[arg(long, env = "FINCH_CREDENTIAL_FILE")]
    pub credential_file: Option<PathBuf>,
}

impl WorkspaceArgs {
    pub fn workspace_ref(&self, file: &FileConfig) -> WorkspaceRef {
        let ws = &file.workspace;
        WorkspaceRef {
            subscription_id: self.subscription_id.clone().or_else(|| ws.subscription_id.clone()),
            resource_group: self.resource_group.clone().or_else(|| ws.resource_group.clone()),
            workspace_name: self.workspace_name.clone().or_else(|| ws.workspace_name.clone()),
            region: self.region.clone().or_else(|| ws.region.clone()),
        }
    }

    pub fn credential_file(&self, file: &FileConfig) -> PathBuf {
        self.credential_file
            .clone()
            .or_else(|| file.workspace.credential_file.clone())
            .unwrap_or_else(|| PathBuf::from(defaults::CREDENTIAL_FILE))
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    #[arg(long, env = "FINCH_CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    #[arg(long, env = "FINCH_VM_SIZE")]
    pub vm_size: Option<String>,

    /// Lower autoscale bound [default: 0]
    #[arg(long, env = "FINCH_MIN_NODES")]
    pub min_nodes: Option<u32>,

    /// Upper autoscale bound [default: 2]
    #[arg(long, env = "FINCH_MAX_NODES")]
    pub max_nodes: Option<u32>,

    /// Request low-priority VMs
    #[arg(long, env = "FINCH_LOW_PRIORITY")]
    pub low_priority: bool,

    /// Seconds between provisioning polls [default: 5]
    #[arg(long, env = "FINCH_PROVISION_POLL_SECS")]
    pub provision_poll_secs: Option<u64>,

    /// Give up waiting for the cluster after this many seconds
    #[arg(long, env = "FINCH_PROVISION_TIMEOUT_SECS")]
    pub provision_timeout_secs: Option<u64>,
}

impl ClusterArgs {
    pub fn cluster_spec(&self, file: &FileConfig) -> Result<ClusterSpec> {
        let c = &file.cluster;
        let name = self
            .cluster_name
            .clone()
            .or_else(|| c.name.clone())
            .unwrap_or_else(|| defaults::CLUSTER_NAME.to_string());
        let vm_size = self
            .vm_size
            .clone()
            .or_else(|| c.vm_size.clone())
            .unwrap_or_else(|| defaults::VM_SIZE.to_string());
        let max_nodes = self.max_nodes.or(c.max_nodes).unwrap_or(defaults::NODE_COUNT);
        let min_nodes = self.min_nodes.or(c.min_nodes).unwrap_or(0);

        let mut spec = ClusterSpec::new(name, vm_size, max_nodes)?;
        spec.scale = ScaleSettings::new(min_nodes, max_nodes)?.with_idle_seconds(
            c.idle_seconds_before_scaledown
                .unwrap_or(defaults::IDLE_SECONDS_BEFORE_SCALEDOWN),
        );
        if self.low_priority || c.low_priority.unwrap_or(false) {
            spec.vm_priority = VmPriority::LowPriority;
        }
        Ok(spec)
    }

    pub fn poll_interval(&self, file: &FileConfig) -> Duration {
        Duration::from_secs(
            self.provision_poll_secs
                .or(file.cluster.poll_interval_secs)
                .unwrap_or(defaults::PROVISION_POLL_SECS),
        )
    }

    pub fn timeout(&self, file: &FileConfig) -> Option<Duration> {
        self.provision_timeout_secs
            .or(file.cluster.timeout_secs)
            .map(Duration::from_secs)
    }
}

/// Flags forwarded to the entry-point script.
#[derive(Args, Debug, Clone, Default)]
pub struct ScriptFlags {
    /// [default: 42]
    #[arg(long, env = "FINCH_SEED")]
    pub seed: Option<u64>,

    /// [default: 2]
    #[arg(long, env = "FINCH_EPOCHS")]
    pub epochs: Option<u32>,

    /// Train on CPU only
    #[arg(long, env = "FINCH_NO_CUDA")]
    pub no_cuda: bool,

    /// Fraction of the dataset to use, in (0, 1] [default: 1.0]
    #[arg(long, env = "FINCH_DATA_PERCENT_USED")]
    pub data_percent_used: Option<f64>,
}

impl ScriptFlags {
    pub fn script_args(&self, file: &FileConfig) -> ScriptArgs {
        let j = &file.job;
        let base = ScriptArgs::default();
        ScriptArgs {
            seed: self.seed.or(j.seed).unwrap_or(base.seed),
            epochs: self.epochs.or(j.epochs).unwrap_or(base.epochs),
            no_cuda: self.no_cuda || j.no_cuda.unwrap_or(base.no_cuda),
            data_percent_used: self
                .data_percent_used
                .or(j.data_percent_used)
                .unwrap_or(base.data_percent_used),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    #[arg(long, env = "FINCH_EXPERIMENT")]
    pub experiment: Option<String>,

    /// Library directory copied next to the entry script
    #[arg(long, env = "FINCH_LIBRARY_DIR")]
    pub library_dir: Option<PathBuf>,

    #[arg(long, env = "FINCH_ENTRY_SCRIPT")]
    pub entry_script: Option<PathBuf>,

    /// Staging directory, recreated on every submission
    #[arg(long, env = "FINCH_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// [default: 2]
    #[arg(long, env = "FINCH_NODE_COUNT")]
    pub node_count: Option<u32>,

    /// [default: 1]
    #[arg(long, env = "FINCH_PROCESSES_PER_NODE")]
    pub processes_per_node: Option<u32>,

    /// Run tag, may be repeated
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    #[command(flatten)]
    pub script: ScriptFlags,
}

fn parse_tag(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => bail!("expected KEY=VALUE, got '{s}'"),
    }
}

impl JobArgs {
    pub fn library_dir(&self, file: &FileConfig) -> PathBuf {
        self.library_dir
            .clone()
            .or_else(|| file.job.library_dir.clone())
            .unwrap_or_else(|| PathBuf::from(defaults::LIBRARY_DIR))
    }

    pub fn entry_script(&self, file: &FileConfig) -> PathBuf {
        self.entry_script
            .clone()
            .or_else(|| file.job.entry_script.clone())
            .unwrap_or_else(|| PathBuf::from(defaults::ENTRY_SCRIPT))
    }

    pub fn project_dir(&self, file: &FileConfig) -> PathBuf {
        self.project_dir
            .clone()
            .or_else(|| file.job.project_dir.clone())
            .unwrap_or_else(|| PathBuf::from(defaults::PROJECT_DIR))
    }

    /// The descriptor, with the entry script given as its staged file name.
    pub fn descriptor(&self, file: &FileConfig) -> Result<JobDescriptor> {
        let j = &file.job;
        let experiment = self
            .experiment
            .clone()
            .or_else(|| j.experiment.clone())
            .unwrap_or_else(|| defaults::EXPERIMENT.to_string());
        let script = self.entry_script(file);
        let script_name = script
            .file_name()
            .with_context(|| format!("Entry script {} has no file name", script.display()))?
            .to_string_lossy()
            .to_string();

        let mut descriptor = JobDescriptor::new(experiment, script_name)
            .with_topology(
                self.node_count.or(j.node_count).unwrap_or(defaults::NODE_COUNT),
                self.processes_per_node
                    .or(j.processes_per_node)
                    .unwrap_or(defaults::PROCESSES_PER_NODE),
            )
            .with_script_args(self.script.script_args(file));

        if let Some(conda) = &j.conda_packages {
            descriptor.dependencies.conda_packages = conda.clone();
        }
        if let Some(pip) = &j.pip_packages {
            descriptor.dependencies.pip_packages = pip.clone();
        }
        if descriptor.script_args.no_cuda {
            descriptor.use_gpu = false;
        }
        for (k, v) in j.tags.iter().chain(self.tags.iter().map(|(k, v)| (k, v))) {
            descriptor = descriptor.with_tag(k, v);
        }

        Ok(descriptor)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Local directory artifacts are downloaded to [default: ./outputs]
    #[arg(long, env = "FINCH_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Artifact to download, may be repeated [default: outputs/results.json]
    #[arg(long = "artifact", env = "FINCH_ARTIFACTS", value_delimiter = ',')]
    pub artifacts: Vec<String>,

    /// Artifact holding the classification report [default: outputs/results.json]
    #[arg(long, env = "FINCH_RESULTS")]
    pub results: Option<String>,

    /// collect-all or fail-fast [default: collect-all]
    #[arg(long, env = "FINCH_RETRIEVAL_POLICY")]
    pub retrieval_policy: Option<RetrievalPolicy>,
}

impl OutputArgs {
    pub fn output_dir(&self, file: &FileConfig) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(|| file.output.dir.clone())
            .unwrap_or_else(|| PathBuf::from(defaults::OUTPUT_DIR))
    }

    pub fn results(&self, file: &FileConfig) -> String {
        self.results
            .clone()
            .or_else(|| file.output.results.clone())
            .unwrap_or_else(|| defaults::RESULTS_ARTIFACT.to_string())
    }

    /// The requested artifacts. Always includes the results artifact.
    pub fn artifacts(&self, file: &FileConfig) -> Vec<String> {
        let mut artifacts = if self.artifacts.is_empty() {
            file.output.artifacts.clone().unwrap_or_default()
        } else {
            self.artifacts.clone()
        };

        let results = self.results(file);
        if !artifacts.contains(&results) {
            artifacts.insert(0, results);
        }
        artifacts
    }

    pub fn retrieval_policy(&self, file: &FileConfig) -> Result<RetrievalPolicy> {
        match (self.retrieval_policy, &file.output.retrieval_policy) {
            (Some(policy), _) => Ok(policy),
            (None, Some(raw)) => Ok(raw.parse()?),
            (None, None) => Ok(RetrievalPolicy::default()),
        }
    }
}

/// Everything `finch run` needs, merged from flags, file and defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[command(flatten)]
    pub job: JobArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Seconds between run status polls [default: 10]
    #[arg(long, env = "FINCH_RUN_POLL_SECS")]
    pub run_poll_secs: Option<u64>,

    /// Forward the run's driver log while waiting
    #[arg(long, env = "FINCH_SHOW_OUTPUT")]
    pub show_output: bool,
}

impl PipelineArgs {
    pub fn run_poll(&self, file: &FileConfig) -> Duration {
        Duration::from_secs(
            self.run_poll_secs
                .or(file.job.poll_interval_secs)
                .unwrap_or(defaults::RUN_POLL_SECS),
        )
    }

    pub fn pipeline_config(&self, file: &FileConfig) -> Result<PipelineConfig> {
        let cluster = self.cluster.cluster_spec(file)?;
        let base = PipelineConfig::new(self.workspace.workspace_ref(file), cluster);

        Ok(PipelineConfig {
            credential_file: Some(self.workspace.credential_file(file)),
            job: self.job.descriptor(file)?,
            library_dir: self.job.library_dir(file),
            entry_script: self.job.entry_script(file),
            project_dir: self.job.project_dir(file),
            output_dir: self.output.output_dir(file),
            artifacts: self.output.artifacts(file),
            results_artifact: self.output.results(file),
            retrieval: self.output.retrieval_policy(file)?,
            provision_poll: self.cluster.poll_interval(file),
            provision_timeout: self.cluster.timeout(file),
            run_poll: self.run_poll(file),
            show_output: self.show_output || file.job.show_output.unwrap_or(false),
            ..base
        })
    }
}

/// Where run artifacts are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// The platform's artifact API.
    Platform,
    /// A local directory laid out as `<run id>/<artifact path>`.
    Fs(PathBuf),
    /// An Azure Blob Storage container, read through OpenDAL.
    Azblob(String),
}

impl std::str::FromStr for ArtifactSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s == "platform" => Ok(Self::Platform),
            Some(("fs", dir)) if !dir.is_empty() => Ok(Self::Fs(PathBuf::from(dir))),
            Some(("azblob", container)) if !container.is_empty() => Ok(Self::Azblob(container.to_string())),
            _ => bail!("unknown artifact store '{s}', expected platform, fs:<dir> or azblob:<container>"),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PlatformArgs {
    /// Base URL of the platform API
    #[arg(long, env = "FINCH_URL", global = true)]
    pub url: Option<String>,

    /// Bearer token
    #[arg(long, env = "FINCH_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// platform, fs:<dir> or azblob:<container> [default: platform]
    #[arg(long, env = "FINCH_ARTIFACT_STORE", global = true)]
    pub artifact_store: Option<String>,

    #[arg(long, env = "FINCH_AZBLOB_ACCOUNT", global = true)]
    pub azblob_account: Option<String>,

    #[arg(long, env = "FINCH_AZBLOB_KEY", global = true, hide_env_values = true)]
    pub azblob_key: Option<String>,

    /// [default: https://<account>.blob.core.windows.net]
    #[arg(long, env = "FINCH_AZBLOB_ENDPOINT", global = true)]
    pub azblob_endpoint: Option<String>,
}

impl PlatformArgs {
    pub fn url(&self, file: &FileConfig) -> Result<String> {
        self.url
            .clone()
            .or_else(|| file.platform.url.clone())
            .context("No platform URL configured, set --url, FINCH_URL or [platform] url")
    }

    pub fn artifact_source(&self, file: &FileConfig) -> Result<ArtifactSource> {
        match self.artifact_store.as_ref().or(file.platform.artifact_store.as_ref()) {
            Some(raw) => raw.parse(),
            None => Ok(ArtifactSource::Platform),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reproduce_the_xnli_setup() {
        let config = PipelineArgs::default()
            .pipeline_config(&FileConfig::default())
            .unwrap();

        assert_eq!(config.cluster.name, "gpucluster");
        assert_eq!(config.cluster.vm_size, "STANDARD_NC6");
        assert_eq!(config.cluster.scale.min_nodes(), 0);
        assert_eq!(config.cluster.scale.max_nodes(), 2);
        assert_eq!(config.job.experiment, "NLP-Entailment-BERT");
        assert_eq!(config.job.entry_script, "train.py");
        assert_eq!(config.job.total_processes(), 2);
        assert_eq!(config.job.script_args, ScriptArgs::default());
        assert_eq!(config.artifacts, vec!["outputs/results.json"]);
        assert_eq!(config.retrieval, RetrievalPolicy::CollectAll);
        assert_eq!(config.credential_file, Some(PathBuf::from("config.json")));
    }

    #[test]
    fn flags_override_the_file() {
        let file = FileConfig::parse(
            r#"
            [cluster]
            max_nodes = 4
            vm_size = "STANDARD_NC12"

            [job]
            epochs = 3
            seed = 7
            "#,
        )
        .unwrap();

        let args = PipelineArgs {
            cluster: ClusterArgs {
                max_nodes: Some(8),
                ..Default::default()
            },
            job: JobArgs {
                script: ScriptFlags {
                    epochs: Some(5),
                    no_cuda: true,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let config = args.pipeline_config(&file).unwrap();

        assert_eq!(config.cluster.scale.max_nodes(), 8);
        assert_eq!(config.cluster.vm_size, "STANDARD_NC12");
        assert_eq!(config.job.script_args.epochs, 5);
        assert_eq!(config.job.script_args.seed, 7);
        assert!(config.job.script_args.no_cuda);
        assert!(!config.job.use_gpu);
    }

    #[test]
    fn zero_max_nodes_is_a_configuration_error() {
        let args = ClusterArgs {
            max_nodes: Some(0),
            ..Default::default()
        };
        assert!(args.cluster_spec(&FileConfig::default()).is_err());
    }

    #[test]
    fn results_artifact_is_always_requested() {
        let args = OutputArgs {
            artifacts: vec!["outputs/model.bin".into()],
            ..Default::default()
        };
        assert_eq!(
            args.artifacts(&FileConfig::default()),
            vec!["outputs/results.json", "outputs/model.bin"]
        );
    }

    #[test]
    fn tags_parse_as_key_value() {
        assert_eq!(
            parse_tag("owner=nlp").unwrap(),
            ("owner".to_string(), "nlp".to_string())
        );
        assert!(parse_tag("owner").is_err());
    }

    #[test]
    fn artifact_sources_parse() {
        assert_eq!("platform".parse::<ArtifactSource>().unwrap(), ArtifactSource::Platform);
        assert_eq!(
            "fs:/mnt/runs".parse::<ArtifactSource>().unwrap(),
            ArtifactSource::Fs(PathBuf::from("/mnt/runs"))
        );
        assert_eq!(
            "azblob:azureml".parse::<ArtifactSource>().unwrap(),
            ArtifactSource::Azblob("azureml".into())
        );
        assert!("s3:bucket".parse::<ArtifactSource>().is_err());
        assert!("fs:".parse::<ArtifactSource>().is_err());
    }

    #[test]
    fn bad_policy_in_file_is_rejected() {
        let file = FileConfig::parse("[output]\nretrieval_policy = \"sometimes\"\n").unwrap();
        assert!(OutputArgs::default().retrieval_policy(&file).is_err());
    }
}
