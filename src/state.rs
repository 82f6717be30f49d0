//! Workflow Instance State
//!
//! One contract's live traversal of a template's ordered stages, plus the
//! append-only action log. The log is the sole audit trail for stage
//! decisions and doubles as the stage-entry-time signal for the escalation
//! scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::template::WorkflowTemplate;

/// Identity of whoever drives an engine operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub email: String,
}

impl Actor {
    pub fn new(user_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Active,
    Completed,
    Cancelled,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown instance state: {}", s)),
        }
    }
}

impl TryFrom<String> for InstanceState {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Closed set of stage decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageAction {
    /// Advance to the next stage (gated on signing/countersign stages).
    Approve,
    /// Fall back to the previous stage; the first stage stays put.
    Reject,
    /// Stay on the current stage; the logged action re-enters it, which
    /// resets the escalation clock.
    Rework,
    /// Advance without gating checks (administrative override).
    Skip,
}

impl StageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Rework => "rework",
            Self::Skip => "skip",
        }
    }

    /// Actions that move the instance forward through the stage list.
    pub fn advances(&self) -> bool {
        matches!(self, Self::Approve | Self::Skip)
    }

    /// Only approve is subject to gating. Skip is the administrative
    /// override; reject and rework never enter a gated stage.
    pub fn is_gated(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

impl FromStr for StageAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "rework" => Ok(Self::Rework),
            "skip" => Ok(Self::Skip),
            _ => Err(format!("Unknown stage action: {}", s)),
        }
    }
}

impl std::fmt::Display for StageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for StageAction {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// A running instance of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct WorkflowInstance {
    pub instance_id: Uuid,
    pub contract_id: Uuid,
    pub template_id: Uuid,
    /// Template version captured at start; later template edits never
    /// retroactively change an in-flight instance.
    pub template_version: i32,
    pub current_stage: String,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub state: InstanceState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Start a fresh instance at the template's first stage.
    pub fn new(contract_id: Uuid, template: &WorkflowTemplate, first_stage: &str) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            contract_id,
            template_id: template.template_id,
            template_version: template.version as i32,
            current_stage: first_stage.to_string(),
            state: InstanceState::Active,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }
}

/// Append-only log entry for one stage decision. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct WorkflowStageAction {
    pub action_id: Uuid,
    pub instance_id: Uuid,
    pub stage_name: String,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub action: StageAction,
    pub actor_id: Uuid,
    pub actor_email: String,
    pub comment: Option<String>,
    pub artifacts: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowStageAction {
    pub fn new(
        instance_id: Uuid,
        stage_name: impl Into<String>,
        action: StageAction,
        actor: &Actor,
    ) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            instance_id,
            stage_name: stage_name.into(),
            action,
            actor_id: actor.user_id,
            actor_email: actor.email.clone(),
            comment: None,
            artifacts: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Option<serde_json::Value>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{StageDef, StageType};

    #[test]
    fn instance_starts_active_at_given_stage() {
        let template = WorkflowTemplate::new(
            "t",
            vec![StageDef::new("review", StageType::Review)],
        );
        let instance = WorkflowInstance::new(Uuid::new_v4(), &template, "review");

        assert_eq!(instance.current_stage, "review");
        assert!(instance.is_active());
        assert!(instance.completed_at.is_none());
    }

    #[test]
    fn action_parsing_round_trip() {
        for action in [
            StageAction::Approve,
            StageAction::Reject,
            StageAction::Rework,
            StageAction::Skip,
        ] {
            assert_eq!(action.as_str().parse::<StageAction>(), Ok(action));
        }
        assert!("escalate".parse::<StageAction>().is_err());
    }

    #[test]
    fn only_approve_is_gated() {
        assert!(StageAction::Approve.is_gated());
        assert!(!StageAction::Skip.is_gated());
        assert!(StageAction::Skip.advances());
        assert!(!StageAction::Rework.advances());
    }

    #[test]
    fn terminal_states() {
        assert!(InstanceState::Completed.is_terminal());
        assert!(InstanceState::Cancelled.is_terminal());
        assert!(!InstanceState::Active.is_terminal());
    }
}
