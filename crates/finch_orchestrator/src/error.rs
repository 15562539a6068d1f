use finch_core::prelude::*;
use thiserror::Error;

/// Any failure of an orchestration step. Each step surfaces its own error unchanged.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Run(#[from] RunError),

    /// The run reached a terminal state other than `Succeeded`.
    #[error("Run {run_id} ended as {status}")]
    RunFailed { run_id: String, status: RunStatus },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Results(#[from] MalformedResultsError),
}
