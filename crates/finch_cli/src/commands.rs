use crate::args::{ClusterArgs, OutputArgs, PipelineArgs, WorkspaceArgs};
use crate::config::FileConfig;

use anyhow::{Context, Result, anyhow, bail};
use finch_core::prelude::*;
use finch_fs::JobPackager;
use finch_orchestrator::prelude::*;
use finch_platform_mock::InMemoryPlatform;
use futures::StreamExt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Report returned by the dry-run platform.
const SAMPLE_REPORT: &str = r#"{
    "contradiction": {"precision": 0.81, "recall": 0.84, "f1-score": 0.82, "support": 1670},
    "entailment": {"precision": 0.87, "recall": 0.76, "f1-score": 0.82, "support": 1670},
    "neutral": {"precision": 0.74, "recall": 0.81, "f1-score": 0.77, "support": 1670},
    "micro avg": {"precision": 0.80, "recall": 0.80, "f1-score": 0.80, "support": 5010},
    "macro avg": {"precision": 0.81, "recall": 0.80, "f1-score": 0.80, "support": 5010},
    "weighted avg": {"precision": 0.81, "recall": 0.80, "f1-score": 0.80, "support": 5010}
}"#;

const DRY_RUN_POLL: Duration = Duration::from_millis(100);

/// An in-memory platform that provisions, runs and reports like the real one, without a network.
pub fn dry_run_platform() -> InMemoryPlatform {
    InMemoryPlatform::new()
        .with_provisioning_polls(2)
        .with_run_script(vec![RunStatus::Queued, RunStatus::Running, RunStatus::Succeeded])
        .with_artifact(defaults::RESULTS_ARTIFACT, SAMPLE_REPORT)
        .with_logs(vec![
            "Loading XNLI training split".into(),
            "Epoch 1/2 finished".into(),
            "Epoch 2/2 finished".into(),
            "Wrote outputs/results.json".into(),
        ])
}

/// Tightens the intervals for the dry-run platform unless they were set explicitly.
pub fn dry_run_config(args: &PipelineArgs, mut config: PipelineConfig) -> PipelineConfig {
    if args.cluster.provision_poll_secs.is_none() {
        config.provision_poll = DRY_RUN_POLL;
    }
    if args.run_poll_secs.is_none() {
        config.run_poll = DRY_RUN_POLL;
    }
    if config.workspace.region.is_none() {
        config.workspace.region = Some("local".into());
    }
    config
}

pub async fn run<S: PlatformServices>(services: S, config: PipelineConfig, style: TableStyle) -> Result<()> {
    let outcome = Pipeline::new(services, config).run().await?;

    println!("Run {} finished: {}", outcome.run.id, outcome.run.status());
    for path in &outcome.downloads.downloaded {
        println!("  downloaded {}", path.display());
    }
    println!();
    println!("{}", outcome.report.render(style));
    Ok(())
}

pub async fn provision<S: PlatformServices>(
    services: S,
    workspace: &WorkspaceArgs,
    cluster: &ClusterArgs,
    file: &FileConfig,
) -> Result<()> {
    let ws = resolver(&services, workspace, file)
        .resolve(workspace.workspace_ref(file))
        .await?;

    let mut provisioner = ComputeProvisioner::new(services.compute().clone())
        .with_poll_interval(cluster.poll_interval(file));
    if let Some(timeout) = cluster.timeout(file) {
        provisioner = provisioner.with_timeout(timeout);
    }
    let handle = provisioner.provision(&ws, &cluster.cluster_spec(file)?).await?;

    println!("{}", serde_json::to_string_pretty(&handle)?);
    Ok(())
}

pub async fn submit<S: PlatformServices>(services: S, args: &PipelineArgs, file: &FileConfig) -> Result<()> {
    let config = args.pipeline_config(file)?;

    let ws = resolver(&services, &args.workspace, file)
        .resolve(config.workspace.clone())
        .await?;
    let cluster = services
        .compute()
        .get_cluster(&ws, &config.cluster.name)
        .await?
        .ok_or_else(|| {
            anyhow!(
                "Compute target {} does not exist, run `finch provision` first",
                config.cluster.name
            )
        })?;

    let packager = JobPackager::new(&config.library_dir, &config.entry_script, &config.project_dir);
    let snapshot = packager.package().await?;
    let run = JobSubmitter::new(services.jobs().clone())
        .submit(&ws, &cluster, config.job, &snapshot)
        .await?;

    println!("{}", run.id);
    Ok(())
}

pub async fn status<J: JobBackend>(jobs: &J, run_id: &str) -> Result<()> {
    let details = jobs.run_details(run_id).await?;
    println!("{}", serde_json::to_string_pretty(&details)?);
    Ok(())
}

pub async fn wait<S: PlatformServices>(
    services: S,
    run_id: &str,
    workspace: &WorkspaceArgs,
    file: &FileConfig,
    poll: Duration,
    show_output: bool,
) -> Result<()> {
    let run = existing_run(&services, run_id, workspace, file).await?;
    let mut monitor = RunMonitor::new(services.jobs().clone(), run).with_poll_interval(poll);

    let forwarder = if !show_output {
        None
    } else {
        match monitor.stream_logs().await {
            Ok(mut stream) => Some(tokio::spawn(async move {
                let mut stdout = std::io::stdout();
                while let Some(Ok(line)) = stream.next().await {
                    write!(stdout, "{}", line.message)?;
                    stdout.flush()?;
                }
                Ok::<_, std::io::Error>(())
            })),
            Err(e) => {
                warn!("Not streaming run output: {e}");
                None
            }
        }
    };

    let status = monitor.wait().await;
    if let Some(task) = forwarder
        && let Some(Err(e)) = drain_forwarder(task, LOG_DRAIN_GRACE).await
    {
        warn!("Run output was cut short: {e}");
    }
    let status = status?;

    println!("Run {run_id}: {status}");
    if status != RunStatus::Succeeded {
        bail!("Run {run_id} did not succeed");
    }
    Ok(())
}

pub async fn logs<J: JobBackend>(jobs: &J, run_id: &str) -> Result<()> {
    let mut stream = jobs.logs(run_id).await?;
    let mut stdout = std::io::stdout();

    while let Some(line) = stream.next().await {
        let line = line?;
        let prefix = line.timestamp.map(|ts| format!("[{ts}] ")).unwrap_or_default();
        match line.source {
            LogSource::Stderr => eprint!("{prefix}{}", line.message),
            LogSource::Stdout | LogSource::Console => {
                write!(stdout, "{prefix}{}", line.message)?;
                stdout.flush()?;
            }
        }
    }
    Ok(())
}

pub async fn download<S: PlatformServices>(
    services: S,
    run_id: &str,
    workspace: &WorkspaceArgs,
    output: &OutputArgs,
    all: bool,
    file: &FileConfig,
) -> Result<()> {
    let run = existing_run(&services, run_id, workspace, file).await?;
    let dest = output.output_dir(file);
    tokio::fs::create_dir_all(&dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let retriever = ResultRetriever::new(services.artifacts().clone()).with_policy(output.retrieval_policy(file)?);
    let report = if all {
        retriever.download_all(&run, &dest).await?
    } else {
        retriever.download(&run, &dest, &output.artifacts(file)).await?
    };

    for path in &report.downloaded {
        println!("downloaded {}", path.display());
    }
    report.ensure_complete()?;
    Ok(())
}

pub async fn report(path: &Path, style: TableStyle, json: bool) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let table = MetricsTable::from_json(&data).with_context(|| format!("Malformed results in {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table.to_value())?);
    } else {
        println!("{}", table.render(style));
    }
    Ok(())
}

fn resolver<S: PlatformServices>(
    services: &S,
    workspace: &WorkspaceArgs,
    file: &FileConfig,
) -> WorkspaceResolver<S::Workspace> {
    WorkspaceResolver::new(services.workspace().clone()).with_credential_file(workspace.credential_file(file))
}

/// A handle for a run submitted earlier. The workspace must already exist.
async fn existing_run<S: PlatformServices>(
    services: &S,
    run_id: &str,
    workspace: &WorkspaceArgs,
    file: &FileConfig,
) -> Result<RunHandle> {
    let ws = resolver(services, workspace, file)
        .lookup(workspace.workspace_ref(file))
        .await?
        .ok_or_else(|| anyhow!("Workspace does not exist, nothing to attach to"))?;

    let experiment = file
        .job
        .experiment
        .clone()
        .unwrap_or_else(|| defaults::EXPERIMENT.to_string());
    info!("Attaching to run {run_id} in {}", ws.workspace_name);
    Ok(RunHandle::new(run_id, experiment, ws))
}
