use crate::error::OrchestrationError;
use crate::monitor::{LOG_DRAIN_GRACE, RunMonitor, drain_forwarder};
use crate::provisioner::ComputeProvisioner;
use crate::resolver::WorkspaceResolver;
use crate::retriever::{DownloadReport, ResultRetriever, RetrievalPolicy};
use crate::submitter::JobSubmitter;

use finch_core::prelude::*;
use finch_fs::{JobPackager, safe_join};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Everything one end-to-end training run needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workspace: WorkspaceRef,
    pub credential_file: Option<PathBuf>,
    pub cluster: ClusterSpec,
    /// The job to run. Its `entry_script` is replaced by the staged script name.
    pub job: JobDescriptor,
    pub library_dir: PathBuf,
    pub entry_script: PathBuf,
    /// Staging directory shipped to the workers.
    pub project_dir: PathBuf,
    pub output_dir: PathBuf,
    pub artifacts: Vec<String>,
    /// The artifact parsed into the final report. Must be one of `artifacts`.
    pub results_artifact: String,
    pub retrieval: RetrievalPolicy,
    pub provision_poll: Duration,
    pub provision_timeout: Option<Duration>,
    pub run_poll: Duration,
    /// Forward the run's driver log while waiting.
    pub show_output: bool,
}

impl PipelineConfig {
    /// A configuration with the XNLI defaults for everything but the workspace and the cluster.
    pub fn new(workspace: WorkspaceRef, cluster: ClusterSpec) -> Self {
        Self {
            workspace,
            credential_file: Some(PathBuf::from(defaults::CREDENTIAL_FILE)),
            cluster,
            job: JobDescriptor::new(defaults::EXPERIMENT, defaults::ENTRY_SCRIPT),
            library_dir: PathBuf::from(defaults::LIBRARY_DIR),
            entry_script: PathBuf::from(defaults::ENTRY_SCRIPT),
            project_dir: PathBuf::from(defaults::PROJECT_DIR),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            artifacts: vec![defaults::RESULTS_ARTIFACT.to_string()],
            results_artifact: defaults::RESULTS_ARTIFACT.to_string(),
            retrieval: RetrievalPolicy::default(),
            provision_poll: Duration::from_secs(defaults::PROVISION_POLL_SECS),
            provision_timeout: None,
            run_poll: Duration::from_secs(defaults::RUN_POLL_SECS),
            show_output: false,
        }
    }
}

/// What a successful pipeline produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub workspace: WorkspaceHandle,
    pub cluster: ComputeClusterHandle,
    pub run: RunHandle,
    pub downloads: DownloadReport,
    pub report: MetricsTable,
}

/// Runs workspace resolution, provisioning, packaging, submission, monitoring, retrieval and
/// reporting in order, against one set of platform services.
pub struct Pipeline<S: PlatformServices> {
    services: S,
    config: PipelineConfig,
}

impl<S: PlatformServices> Pipeline<S> {
    pub fn new(services: S, config: PipelineConfig) -> Self {
        Self { services, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Halts at the first failing step and returns its error unchanged.
    pub async fn run(&self) -> Result<PipelineOutcome, OrchestrationError> {
        let config = &self.config;
        if !config.artifacts.contains(&config.results_artifact) {
            return Err(ConfigurationError::Invalid(format!(
                "results artifact {} is not among the requested artifacts",
                config.results_artifact
            ))
            .into());
        }

        info!("[1/7] Resolving workspace");
        let mut resolver = WorkspaceResolver::new(self.services.workspace().clone());
        if let Some(path) = &config.credential_file {
            resolver = resolver.with_credential_file(path);
        }
        let workspace = resolver.resolve(config.workspace.clone()).await?;

        info!("[2/7] Provisioning compute target {}", config.cluster.name);
        let mut provisioner =
            ComputeProvisioner::new(self.services.compute().clone()).with_poll_interval(config.provision_poll);
        if let Some(timeout) = config.provision_timeout {
            provisioner = provisioner.with_timeout(timeout);
        }
        let cluster = provisioner.provision(&workspace, &config.cluster).await?;

        info!("[3/7] Packaging {}", config.project_dir.display());
        let packager = JobPackager::new(&config.library_dir, &config.entry_script, &config.project_dir);
        let snapshot = packager.package().await?;

        info!("[4/7] Submitting to experiment {}", config.job.experiment);
        let mut job = config.job.clone();
        job.entry_script = packager.entry_script_name()?;
        let run = JobSubmitter::new(self.services.jobs().clone())
            .submit(&workspace, &cluster, job, &snapshot)
            .await?;

        info!("[5/7] Waiting for run {}", run.id);
        let mut monitor = RunMonitor::new(self.services.jobs().clone(), run).with_poll_interval(config.run_poll);
        let forwarder = if config.show_output {
            forward_logs(&monitor).await
        } else {
            None
        };
        let status = monitor.wait().await;
        if let Some(task) = forwarder {
            drain_forwarder(task, LOG_DRAIN_GRACE).await;
        }
        let status = status?;
        let run = monitor.into_handle();
        if status != RunStatus::Succeeded {
            return Err(OrchestrationError::RunFailed { run_id: run.id, status });
        }

        info!("[6/7] Downloading {} artifact(s) to {}", config.artifacts.len(), config.output_dir.display());
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(ArtifactError::from)?;
        let downloads = ResultRetriever::new(self.services.artifacts().clone())
            .with_policy(config.retrieval)
            .download(&run, &config.output_dir, &config.artifacts)
            .await?;
        downloads.ensure_complete()?;

        info!("[7/7] Formatting {}", config.results_artifact);
        let results = safe_join(&config.output_dir, &config.results_artifact)?;
        let data = tokio::fs::read(&results).await.map_err(MalformedResultsError::from)?;
        let report = MetricsTable::from_json(&data)?;
        info!("Classification report:\n{report}");

        Ok(PipelineOutcome {
            workspace,
            cluster,
            run,
            downloads,
            report,
        })
    }
}

/// Spawns a task logging every driver log line. [`None`] if the backend cannot stream logs.
async fn forward_logs<J: JobBackend>(monitor: &RunMonitor<J>) -> Option<tokio::task::JoinHandle<()>> {
    match monitor.stream_logs().await {
        Ok(mut stream) => Some(tokio::spawn(async move {
            while let Some(line) = stream.next().await {
                match line {
                    Ok(log) => info!(target: "finch::run", "{}", log.message.trim_end()),
                    Err(e) => {
                        debug!("Log stream ended: {e}");
                        break;
                    }
                }
            }
        })),
        Err(e) => {
            debug!("Not streaming run output: {e}");
            None
        }
    }
}
