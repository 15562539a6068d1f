use crate::error::ConfigurationError;

use serde::{Deserialize, Serialize};

/// The resolved identity of a remote ML workspace.
///
/// Produced once per session by the resolver and threaded explicitly through every later call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceHandle {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace_name: String,
    pub region: String,
}

impl WorkspaceHandle {
    pub fn identity(&self) -> WorkspaceIdentity {
        WorkspaceIdentity {
            subscription_id: self.subscription_id.clone(),
            resource_group: self.resource_group.clone(),
            workspace_name: self.workspace_name.clone(),
        }
    }

    /// Fills a route template containing `{subscription}`, `{resource_group}` and `{workspace}`.
    pub fn route(&self, template: &str) -> String {
        self.identity().route(template)
    }
}

/// The lookup key of a workspace, without its region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceIdentity {
    pub subscription_id: String,
    pub resource_group: String,
    pub workspace_name: String,
}

impl WorkspaceIdentity {
    pub fn route(&self, template: &str) -> String {
        template
            .replace("{subscription}", &self.subscription_id)
            .replace("{resource_group}", &self.resource_group)
            .replace("{workspace}", &self.workspace_name)
    }
}

/// A possibly incomplete workspace reference.
///
/// Built from the credential file and/or explicit parameters. The credential file uses the
/// same field names, `location` is accepted as an alias of `region`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRef {
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
    #[serde(default, alias = "location")]
    pub region: Option<String>,
}

impl WorkspaceRef {
    /// Parses a credential file.
    pub fn from_json(path: &str, data: &[u8]) -> Result<Self, ConfigurationError> {
        serde_json::from_slice(data).map_err(|e| ConfigurationError::CredentialFile {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Keeps every field of `self` and takes the missing ones from `fallback`.
    pub fn or(self, fallback: WorkspaceRef) -> Self {
        Self {
            subscription_id: non_empty(self.subscription_id).or(non_empty(fallback.subscription_id)),
            resource_group: non_empty(self.resource_group).or(non_empty(fallback.resource_group)),
            workspace_name: non_empty(self.workspace_name).or(non_empty(fallback.workspace_name)),
            region: non_empty(self.region).or(non_empty(fallback.region)),
        }
    }

    pub fn identity(&self) -> Result<WorkspaceIdentity, ConfigurationError> {
        let field = |value: &Option<String>, name: &'static str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ConfigurationError::Missing(name))
        };

        Ok(WorkspaceIdentity {
            subscription_id: field(&self.subscription_id, "subscription_id")?,
            resource_group: field(&self.resource_group, "resource_group")?,
            workspace_name: field(&self.workspace_name, "workspace_name")?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> WorkspaceRef {
        WorkspaceRef {
            subscription_id: Some("sub".into()),
            resource_group: Some("rg".into()),
            workspace_name: Some("ws".into()),
            region: Some("eastus".into()),
        }
    }

    #[test]
    fn file_fields_win_over_overrides() {
        let file = WorkspaceRef {
            subscription_id: Some("file-sub".into()),
            resource_group: None,
            ..Default::default()
        };

        let merged = file.or(full());
        assert_eq!(merged.subscription_id.as_deref(), Some("file-sub"));
        assert_eq!(merged.resource_group.as_deref(), Some("rg"));
        assert_eq!(merged.region.as_deref(), Some("eastus"));
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let partial = WorkspaceRef {
            workspace_name: Some("  ".into()),
            ..full()
        };
        assert!(matches!(
            partial.identity(),
            Err(ConfigurationError::Missing("workspace_name"))
        ));
    }

    #[test]
    fn credential_file_accepts_location_alias() {
        let data = br#"{"subscription_id":"s","resource_group":"r","workspace_name":"w","location":"westeurope"}"#;
        let parsed = WorkspaceRef::from_json("config.json", data).unwrap();
        assert_eq!(parsed.region.as_deref(), Some("westeurope"));
        assert_eq!(parsed.identity().unwrap().workspace_name, "w");
    }

    #[test]
    fn broken_credential_file_is_a_configuration_error() {
        let err = WorkspaceRef::from_json("config.json", b"{not json").unwrap_err();
        assert!(matches!(err, ConfigurationError::CredentialFile { .. }));
    }

    #[test]
    fn routes_are_filled_from_identity() {
        let id = full().identity().unwrap();
        assert_eq!(
            id.route(crate::constants::routes::WORKSPACE),
            "/workspaces/sub/rg/ws"
        );
    }
}
