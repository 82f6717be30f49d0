//! Engine Error Types
//!
//! One typed error enum for all engine operations. Domain variants are
//! non-retriable: the caller must remediate (complete KYC, provision a
//! signing authority, request a fresh link) before retrying.

use thiserror::Error;
use uuid::Uuid;

use crate::blob_store::BlobStoreError;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    // ── Workflow ──
    #[error("active workflow already exists for contract {0}")]
    WorkflowAlreadyActive(Uuid),

    #[error("workflow template {0} is not published")]
    TemplateNotPublished(Uuid),

    #[error("current stage is '{current}', not '{requested}'")]
    StaleStage { current: String, requested: String },

    #[error("workflow instance {0} is in a terminal state")]
    WorkflowTerminal(Uuid),

    #[error("KYC pack incomplete: {missing} required item(s) pending")]
    KycIncomplete { missing: usize },

    #[error("no signing authority for entity {entity_id} at stage '{stage}'")]
    NoSigningAuthority { entity_id: Uuid, stage: String },

    // ── Signing ──
    #[error("invalid signing token")]
    InvalidToken,

    #[error("this signing link has expired")]
    TokenExpired,

    #[error("this signing session is no longer active")]
    SessionInactive,

    #[error("this document has already been signed by the signer")]
    AlreadySigned,

    // ── Infrastructure ──
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("blob store: {0}")]
    Blob(#[from] BlobStoreError),

    #[error("document renderer: {0}")]
    Render(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// True for the domain errors the caller can only fix by external
    /// remediation, never by retrying the same call.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::WorkflowAlreadyActive(_)
                | Self::TemplateNotPublished(_)
                | Self::StaleStage { .. }
                | Self::WorkflowTerminal(_)
                | Self::KycIncomplete { .. }
                | Self::NoSigningAuthority { .. }
                | Self::InvalidToken
                | Self::TokenExpired
                | Self::SessionInactive
                | Self::AlreadySigned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_are_flagged() {
        assert!(EngineError::InvalidToken.is_domain());
        assert!(EngineError::AlreadySigned.is_domain());
        assert!(!EngineError::NotFound("x".into()).is_domain());
        assert!(!EngineError::Conflict("x".into()).is_domain());
    }
}
