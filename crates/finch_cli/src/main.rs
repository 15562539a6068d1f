mod args;
mod commands;
mod config;

use args::{ArtifactSource, ClusterArgs, OutputArgs, PipelineArgs, PlatformArgs, WorkspaceArgs};
use config::FileConfig;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use finch_client::FinchClient;
use finch_core::prelude::*;
use finch_fs::FileSystemArtifactStore;
use finch_opendal::OpendalArtifactStore;
use finch_orchestrator::CoreServices;
use opendal::{Operator, services::Azblob};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "finch")]
#[command(about = "Distributed fine-tuning jobs on a managed ML platform", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    platform: PlatformArgs,

    /// Experiment file
    #[arg(long, short = 'c', env = "FINCH_CONFIG", global = true, default_value = "finch.toml")]
    config: PathBuf,

    #[arg(long, env = "FINCH_LOG_FORMAT", global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision, package, submit, wait, download and report in one go
    Run {
        #[command(flatten)]
        args: PipelineArgs,

        /// Run against an in-memory platform with a sample report
        #[arg(long)]
        dry_run: bool,

        /// Decimals in the report table
        #[arg(long)]
        decimals: Option<usize>,
    },
    /// Get or create the workspace and the compute cluster
    Provision {
        #[command(flatten)]
        workspace: WorkspaceArgs,

        #[command(flatten)]
        cluster: ClusterArgs,
    },
    /// Package and submit the job without waiting. Prints the run id
    Submit {
        #[command(flatten)]
        args: PipelineArgs,
    },
    /// Print the platform's view of a run
    Status { run_id: String },
    /// Wait until a run is finished
    Wait {
        run_id: String,

        #[command(flatten)]
        workspace: WorkspaceArgs,

        /// Seconds between status polls
        #[arg(long, default_value_t = defaults::RUN_POLL_SECS)]
        poll_secs: u64,

        /// Forward the run's driver log while waiting
        #[arg(long)]
        show_output: bool,
    },
    /// Stream a run's driver log
    Logs { run_id: String },
    /// Download artifacts of a run
    Download {
        run_id: String,

        #[command(flatten)]
        workspace: WorkspaceArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Download every artifact of the run
        #[arg(long)]
        all: bool,
    },
    /// Render a classification report file
    Report {
        #[arg(default_value = "outputs/outputs/results.json")]
        path: PathBuf,

        #[arg(long)]
        decimals: Option<usize>,

        /// Print normalized JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn table_style(decimals: Option<usize>, file: &FileConfig) -> TableStyle {
    TableStyle {
        decimals: decimals.or(file.output.decimals),
    }
}

fn azblob_operator(container: &str, platform: &PlatformArgs) -> Result<Operator> {
    let account = platform
        .azblob_account
        .as_deref()
        .context("An azblob artifact store needs --azblob-account (FINCH_AZBLOB_ACCOUNT)")?;
    let endpoint = platform
        .azblob_endpoint
        .clone()
        .unwrap_or_else(|| format!("https://{account}.blob.core.windows.net"));

    let mut builder = Azblob::default()
        .container(container)
        .endpoint(&endpoint)
        .account_name(account);
    if let Some(key) = &platform.azblob_key {
        builder = builder.account_key(key);
    }

    Ok(Operator::new(builder)?.finish())
}

async fn execute<S: PlatformServices>(services: S, command: Commands, file: &FileConfig) -> Result<()> {
    match command {
        Commands::Run { args, decimals, .. } => {
            let config = args.pipeline_config(file)?;
            commands::run(services, config, table_style(decimals, file)).await
        }
        Commands::Provision { workspace, cluster } => {
            commands::provision(services, &workspace, &cluster, file).await
        }
        Commands::Submit { args } => commands::submit(services, &args, file).await,
        Commands::Status { run_id } => commands::status(services.jobs(), &run_id).await,
        Commands::Wait {
            run_id,
            workspace,
            poll_secs,
            show_output,
        } => {
            commands::wait(
                services,
                &run_id,
                &workspace,
                file,
                Duration::from_secs(poll_secs),
                show_output,
            )
            .await
        }
        Commands::Logs { run_id } => commands::logs(services.jobs(), &run_id).await,
        Commands::Download {
            run_id,
            workspace,
            output,
            all,
        } => commands::download(services, &run_id, &workspace, &output, all, file).await,
        Commands::Report { path, decimals, json } => {
            commands::report(&path, table_style(decimals, file), json).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let file = FileConfig::load(&cli.config)?;

    match cli.command {
        Commands::Report { path, decimals, json } => {
            return commands::report(&path, table_style(decimals, &file), json).await;
        }
        Commands::Run {
            args,
            dry_run: true,
            decimals,
        } => {
            let config = commands::dry_run_config(&args, args.pipeline_config(&file)?);
            return commands::run(commands::dry_run_platform(), config, table_style(decimals, &file)).await;
        }
        command => {
            let client = FinchClient::new(cli.platform.url(&file)?, cli.platform.token.clone());
            if matches!(command, Commands::Run { .. }) {
                client.health().await.context("Platform is not reachable")?;
            }

            match cli.platform.artifact_source(&file)? {
                ArtifactSource::Platform => execute(client, command, &file).await,
                ArtifactSource::Fs(dir) => {
                    let services = CoreServices {
                        workspace: client.clone(),
                        compute: client.clone(),
                        jobs: client.clone(),
                        artifacts: FileSystemArtifactStore::new(dir),
                    };
                    execute(services, command, &file).await
                }
                ArtifactSource::Azblob(container) => {
                    let services = CoreServices {
                        workspace: client.clone(),
                        compute: client.clone(),
                        jobs: client.clone(),
                        artifacts: OpendalArtifactStore::new(azblob_operator(&container, &cli.platform)?),
                    };
                    execute(services, command, &file).await
                }
            }
        }
    }
}
