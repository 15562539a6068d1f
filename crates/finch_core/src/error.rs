use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A workspace identity field was neither in the credential file nor supplied explicitly.
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    /// The credential file exists but could not be read or parsed.
    #[error("Invalid credential file {path}: {reason}")]
    CredentialFile { path: String, reason: String },

    /// Autoscale bounds violate `0 <= min <= max` or request `max = 0`.
    #[error("Invalid scale settings: {0}")]
    InvalidScale(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The platform reported a terminal `Failed` provisioning state.
    #[error("Cluster {name} failed to provision: {reason}")]
    Failed { name: String, reason: String },

    #[error("Cluster {name} was canceled while provisioning")]
    Canceled { name: String },

    #[error("Timed out after {seconds}s waiting for cluster {name}")]
    Timeout { name: String, seconds: u64 },

    /// An observed snapshot broke `min <= current <= max`.
    #[error("Cluster {name} reported node counts outside its bounds: {detail}")]
    BoundsViolated { name: String, detail: String },

    /// The cluster does not exist.
    #[error("Cluster {0} not found")]
    NotFound(String),

    /// Transport or provider failure.
    #[error("Compute system failure: {0}")]
    System(String),
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The job descriptor or its snapshot is malformed.
    #[error("Invalid job descriptor: {0}")]
    InvalidDescriptor(String),

    /// The platform refused the submission.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport or provider failure.
    #[error("Submission system failure: {0}")]
    System(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run {0} not found")]
    NotFound(String),

    /// Transport or provider failure.
    #[error("Run system failure: {0}")]
    System(String),

    /// The backend does not support this feature (e.g. log streaming).
    #[error("Feature not supported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A single requested artifact does not exist in the run's output store.
    #[error("Artifact {0} not found")]
    NotFound(String),

    /// One or more artifacts of a batch were missing.
    #[error("Artifacts not found: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// The artifact path is absolute or escapes the destination directory.
    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact store failure: {0}")]
    System(String),

    #[error("Feature not supported: {0}")]
    Unsupported(String),
}

/// The results artifact does not match the classification report schema.
#[derive(Debug, Error)]
pub enum MalformedResultsError {
    #[error("Results are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Results document must be a JSON object")]
    NotAnObject,

    #[error("Row '{0}' must be an object")]
    RowNotAnObject(String),

    #[error("Row '{label}' is missing '{key}'")]
    MissingKey { label: String, key: &'static str },

    #[error("Row '{label}' has a non-numeric '{key}'")]
    NotNumeric { label: String, key: &'static str },

    #[error("Results contain no aggregate row (micro avg, macro avg or weighted avg)")]
    NoAggregate,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The platform rejected the request as invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport or provider failure.
    #[error("Platform system failure: {0}")]
    System(String),
}
