//! Contract Mirror Record
//!
//! The engine does not own contracts; it owns their lifecycle. This record
//! carries the handful of contract fields the engines read (entity, project,
//! type, source document) plus the denormalized display mirrors they write
//! back on every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Contract-level signing status mirror, written by the signing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractSigningStatus {
    Unsigned,
    Signed,
}

impl ContractSigningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::Signed => "signed",
        }
    }
}

impl FromStr for ContractSigningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned" => Ok(Self::Unsigned),
            "signed" => Ok(Self::Signed),
            _ => Err(format!("Unknown signing status: {}", s)),
        }
    }
}

/// The slice of a contract the lifecycle engines operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct ContractRecord {
    pub contract_id: Uuid,
    pub title: String,
    /// Legal entity the contract belongs to (signing-authority scope).
    pub entity_id: Uuid,
    /// Optional project scope (narrows signing-authority resolution).
    pub project_id: Option<Uuid>,
    /// Free-form type label matched against authority patterns.
    pub contract_type: String,
    /// Blob reference of the current source document (PDF).
    pub storage_path: Option<String>,
    /// Mirror of the active workflow's current stage, or "completed".
    pub workflow_state: Option<String>,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub signing_status: ContractSigningStatus,
    pub created_at: DateTime<Utc>,
}

impl ContractRecord {
    pub fn new(title: impl Into<String>, entity_id: Uuid, contract_type: impl Into<String>) -> Self {
        Self {
            contract_id: Uuid::new_v4(),
            title: title.into(),
            entity_id,
            project_id: None,
            contract_type: contract_type.into(),
            storage_path: None,
            workflow_state: None,
            signing_status: ContractSigningStatus::Unsigned,
            created_at: Utc::now(),
        }
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = Some(path.into());
        self
    }
}

impl TryFrom<String> for ContractSigningStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
