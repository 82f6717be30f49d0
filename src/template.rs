//! Workflow Templates
//!
//! A template is the ordered list of stages a contract traverses. Templates
//! are versioned: publishing bumps the version and freezes the stage list;
//! in-flight instances keep the version they captured at start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Closed set of stage kinds. Signing and countersign stages are gated
/// (KYC readiness, signing authority) before an approve is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageType {
    Review,
    Approval,
    Signing,
    Countersign,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Approval => "approval",
            Self::Signing => "signing",
            Self::Countersign => "countersign",
        }
    }

    /// Stage kinds that require the KYC gate before approval.
    pub fn requires_kyc_gate(&self) -> bool {
        matches!(self, Self::Signing | Self::Countersign)
    }

    /// Stage kinds that require a signing-authority match before approval.
    pub fn requires_signing_authority(&self) -> bool {
        matches!(self, Self::Countersign)
    }
}

impl FromStr for StageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "review" => Ok(Self::Review),
            "approval" => Ok(Self::Approval),
            "signing" => Ok(Self::Signing),
            "countersign" => Ok(Self::Countersign),
            _ => Err(format!("Unknown stage type: {}", s)),
        }
    }
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One named step in a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,
    #[serde(rename = "type")]
    pub stage_type: StageType,
    /// Role expected to act on this stage (display/routing only).
    pub owner_role: Option<String>,
}

impl StageDef {
    pub fn new(name: impl Into<String>, stage_type: StageType) -> Self {
        Self {
            name: name.into(),
            stage_type,
            owner_role: None,
        }
    }

    pub fn with_owner(mut self, role: impl Into<String>) -> Self {
        self.owner_role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Draft,
    Published,
    Archived,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for TemplateStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Unknown template status: {}", s)),
        }
    }
}

/// Versioned, ordered stage list for one contract type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub template_id: Uuid,
    pub name: String,
    /// Contract type this template applies to (display/selection only).
    pub contract_type: Option<String>,
    pub stages: Vec<StageDef>,
    /// Monotonic, bumped on publish.
    pub version: u32,
    pub status: TemplateStatus,
    pub created_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, stages: Vec<StageDef>) -> Self {
        Self {
            template_id: Uuid::new_v4(),
            name: name.into(),
            contract_type: None,
            stages,
            version: 0,
            status: TemplateStatus::Draft,
            created_at: Utc::now(),
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == TemplateStatus::Published
    }

    /// First stage by declared order, the entry point of every instance.
    pub fn first_stage(&self) -> Option<&StageDef> {
        self.stages.first()
    }

    pub fn stage(&self, name: &str) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Publish the template: bump the version and freeze the stage list.
    /// A template without stages cannot be published.
    pub fn publish(&mut self) -> Result<()> {
        if self.status != TemplateStatus::Draft {
            return Err(EngineError::Conflict(format!(
                "template {} is {}, only drafts can be published",
                self.template_id,
                self.status.as_str()
            )));
        }
        if self.stages.is_empty() {
            return Err(EngineError::InvalidInput(
                "template has no stages".to_string(),
            ));
        }
        self.version += 1;
        self.status = TemplateStatus::Published;
        Ok(())
    }

    /// Create a new draft from a published template. The draft keeps the
    /// version counter so the next publish is strictly greater; the source
    /// template stays published and in-flight instances are unaffected.
    pub fn new_draft(&self) -> Self {
        Self {
            template_id: self.template_id,
            name: self.name.clone(),
            contract_type: self.contract_type.clone(),
            stages: self.stages.clone(),
            version: self.version,
            status: TemplateStatus::Draft,
            created_at: Utc::now(),
        }
    }

    pub fn archive(&mut self) {
        self.status = TemplateStatus::Archived;
    }
}
