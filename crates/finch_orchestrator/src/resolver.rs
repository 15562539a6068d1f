use crate::error::OrchestrationError;

use finch_core::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resolves the workspace every later step runs in, creating it when it does not exist.
#[derive(Clone)]
pub struct WorkspaceResolver<W: WorkspaceBackend> {
    backend: W,
    credential_file: Option<PathBuf>,
}

impl<W: WorkspaceBackend> WorkspaceResolver<W> {
    pub fn new(backend: W) -> Self {
        Self {
            backend,
            credential_file: None,
        }
    }

    /// A credential file consulted before the explicit parameters. It may be absent.
    pub fn with_credential_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_file = Some(path.into());
        self
    }

    /// Merges the credential file (if present) with `overrides`, looks the workspace up and creates it on a miss.
    ///
    /// Values from the credential file win, `overrides` only fill the fields it lacks.
    pub async fn resolve(&self, overrides: WorkspaceRef) -> Result<WorkspaceHandle, OrchestrationError> {
        let merged = self.merge(overrides).await?;

        let identity = merged.identity()?;
        if let Some(handle) = self.backend.get_workspace(&identity).await? {
            info!(
                "Found workspace {} in {}",
                handle.workspace_name, handle.region
            );
            return Ok(handle);
        }

        let region = merged
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(ConfigurationError::Missing("region"))?;

        info!(
            "Creating workspace {} in resource group {} ({region})",
            identity.workspace_name, identity.resource_group
        );
        Ok(self.backend.create_workspace(&identity, region).await?)
    }

    /// Like [`resolve`](Self::resolve), but never creates anything.
    pub async fn lookup(&self, overrides: WorkspaceRef) -> Result<Option<WorkspaceHandle>, OrchestrationError> {
        let identity = self.merge(overrides).await?.identity()?;
        Ok(self.backend.get_workspace(&identity).await?)
    }

    async fn merge(&self, overrides: WorkspaceRef) -> Result<WorkspaceRef, ConfigurationError> {
        let Some(path) = &self.credential_file else {
            return Ok(overrides);
        };

        match load_credential_file(path).await? {
            Some(file) => {
                debug!("Loaded workspace credentials from {}", path.display());
                Ok(file.or(overrides))
            }
            None => Ok(overrides),
        }
    }
}

async fn load_credential_file(path: &Path) -> Result<Option<WorkspaceRef>, ConfigurationError> {
    match tokio::fs::read(path).await {
        Ok(data) => WorkspaceRef::from_json(&path.display().to_string(), &data).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigurationError::CredentialFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}
