use crate::workspace::WorkspaceHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed(String),
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Canceled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed(_) | Self::Canceled => 2,
        }
    }

    /// Whether moving from `self` to `next` goes forward.
    ///
    /// Terminal states accept nothing, not even another terminal state.
    pub fn can_advance_to(&self, next: &RunStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => f.write_str("Queued"),
            Self::Running => f.write_str("Running"),
            Self::Succeeded => f.write_str("Succeeded"),
            Self::Failed(reason) => write!(f, "Failed ({reason})"),
            Self::Canceled => f.write_str("Canceled"),
        }
    }
}

/// A submitted run.
///
/// The status only moves forward through `Queued -> Running -> {Succeeded, Failed, Canceled}`
/// and never changes once terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunHandle {
    pub id: String,
    pub experiment: String,
    pub workspace: WorkspaceHandle,
    pub submitted_at: DateTime<Utc>,
    status: RunStatus,
}

impl RunHandle {
    pub fn new(
        id: impl Into<String>,
        experiment: impl Into<String>,
        workspace: WorkspaceHandle,
    ) -> Self {
        Self {
            id: id.into(),
            experiment: experiment.into(),
            workspace,
            submitted_at: Utc::now(),
            status: RunStatus::Queued,
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Folds an observed status into the handle.
    ///
    /// Returns `true` if the status advanced. Backward or post-terminal observations are ignored.
    pub fn observe(&mut self, next: RunStatus) -> bool {
        if self.status.can_advance_to(&next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// The platform's view of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunDetails {
    pub id: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogSource {
    Stdout,
    Stderr,
    Console,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogOutput {
    pub source: LogSource,
    /// RFC3339 timestamp string ,e.g., "2026-01-01T01:00:00Z".
    pub timestamp: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> RunHandle {
        RunHandle::new(
            "run-1",
            "exp",
            WorkspaceHandle {
                subscription_id: "s".into(),
                resource_group: "r".into(),
                workspace_name: "w".into(),
                region: "eastus".into(),
            },
        )
    }

    #[test]
    fn status_moves_forward_only() {
        let mut run = handle();
        assert_eq!(run.status(), &RunStatus::Queued);

        assert!(run.observe(RunStatus::Running));
        assert!(!run.observe(RunStatus::Queued));
        assert!(!run.observe(RunStatus::Running));
        assert_eq!(run.status(), &RunStatus::Running);

        assert!(run.observe(RunStatus::Succeeded));
        assert!(!run.observe(RunStatus::Running));
        assert!(!run.observe(RunStatus::Failed("late".into())));
        assert_eq!(run.status(), &RunStatus::Succeeded);
    }

    #[test]
    fn queued_may_jump_to_terminal() {
        let mut run = handle();
        assert!(run.observe(RunStatus::Canceled));
        assert!(run.status().is_terminal());
    }

    #[test]
    fn status_wire_format() {
        let json = serde_json::to_string(&RunStatus::Failed("oom".into())).unwrap();
        assert_eq!(json, r#"{"Failed":"oom"}"#);
        let parsed: RunStatus = serde_json::from_str(r#""Running""#).unwrap();
        assert_eq!(parsed, RunStatus::Running);
    }
}
