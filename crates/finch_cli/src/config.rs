//! The optional `finch.toml` experiment file.
//!
//! Every value is optional. Command line flags (and their `FINCH_*` env vars) override the
//! file, the file overrides the built-in defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub platform: PlatformSection,
    pub workspace: WorkspaceSection,
    pub cluster: ClusterSection,
    pub job: JobSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformSection {
    pub url: Option<String>,
    /// `platform`, `fs:<dir>` or `azblob:<container>`.
    pub artifact_store: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceSection {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub workspace_name: Option<String>,
    pub region: Option<String>,
    pub credential_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSection {
    pub name: Option<String>,
    pub vm_size: Option<String>,
    pub min_nodes: Option<u32>,
    pub max_nodes: Option<u32>,
    pub low_priority: Option<bool>,
    pub idle_seconds_before_scaledown: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSection {
    pub experiment: Option<String>,
    pub library_dir: Option<PathBuf>,
    pub entry_script: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
    pub node_count: Option<u32>,
    pub processes_per_node: Option<u32>,
    pub seed: Option<u64>,
    pub epochs: Option<u32>,
    pub no_cuda: Option<bool>,
    pub data_percent_used: Option<f64>,
    pub conda_packages: Option<Vec<String>>,
    pub pip_packages: Option<Vec<String>>,
    pub tags: BTreeMap<String, String>,
    pub poll_interval_secs: Option<u64>,
    pub show_output: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub dir: Option<PathBuf>,
    pub artifacts: Option<Vec<String>>,
    pub results: Option<String>,
    pub retrieval_policy: Option<String>,
    pub decimals: Option<usize>,
}

impl FileConfig {
    /// Loads `path`. A missing file yields the empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration file at {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let config = FileConfig::parse(
            r#"
            [platform]
            url = "https://ml.example.com/api"

            [workspace]
            subscription_id = "sub"
            resource_group = "nlp-rg"
            workspace_name = "nlp-ws"
            region = "eastus"

            [cluster]
            name = "gpucluster"
            max_nodes = 4
            low_priority = true

            [job]
            epochs = 3
            data_percent_used = 0.1
            pip_packages = ["pandas"]
            tags = { owner = "nlp" }

            [output]
            artifacts = ["outputs/results.json", "outputs/model.bin"]
            retrieval_policy = "fail-fast"
            "#,
        )
        .unwrap();

        assert_eq!(config.platform.url.as_deref(), Some("https://ml.example.com/api"));
        assert_eq!(config.workspace.resource_group.as_deref(), Some("nlp-rg"));
        assert_eq!(config.cluster.max_nodes, Some(4));
        assert_eq!(config.cluster.low_priority, Some(true));
        assert_eq!(config.job.epochs, Some(3));
        assert_eq!(config.job.tags["owner"], "nlp");
        assert_eq!(config.output.artifacts.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("[cluster]\nmax_node = 4\n").is_err());
    }

    #[test]
    fn missing_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load(&dir.path().join("finch.toml")).unwrap();
        assert!(config.workspace.subscription_id.is_none());
    }
}
