//! Persistence Port
//!
//! All engine state behind one trait, organized by concern. Engines operate
//! exclusively through this trait, enabling pluggable backends (MemoryStore
//! for POC and tests, Postgres for production).
//!
//! Two invariants are store-level contracts, not application logic, so they
//! hold under concurrent callers:
//! - at most one *active* workflow instance per contract
//!   (`insert_active_instance` fails with `Conflict`);
//! - at most one *unresolved* escalation event per (instance, rule)
//!   (`insert_escalation_event` fails with `Conflict`).

use async_trait::async_trait;
use uuid::Uuid;

use crate::audit::SigningAuditLog;
use crate::authority::SigningAuthority;
use crate::contract::{ContractRecord, ContractSigningStatus};
use crate::error::Result;
use crate::escalation::{EscalationEvent, EscalationRule};
use crate::kyc::KycPack;
use crate::session::{SessionSigner, SigningField, SigningSession};
use crate::state::{WorkflowInstance, WorkflowStageAction};
use crate::template::WorkflowTemplate;

#[async_trait]
pub trait LifecycleStore: Send + Sync {
    // ── Contracts ──

    async fn save_contract(&self, contract: &ContractRecord) -> Result<()>;
    async fn load_contract(&self, contract_id: Uuid) -> Result<Option<ContractRecord>>;
    async fn update_contract_workflow_state(&self, contract_id: Uuid, state: &str) -> Result<()>;
    async fn update_contract_signing_status(
        &self,
        contract_id: Uuid,
        status: ContractSigningStatus,
    ) -> Result<()>;

    // ── Workflow templates ──

    /// Upsert keyed by `(template_id, version)`. Published versions are
    /// immutable rows, so in-flight instances can always load the version
    /// they captured at start.
    async fn save_template(&self, template: &WorkflowTemplate) -> Result<()>;
    async fn load_template(
        &self,
        template_id: Uuid,
        version: u32,
    ) -> Result<Option<WorkflowTemplate>>;
    /// Highest published version, if any.
    async fn load_latest_published_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<WorkflowTemplate>>;

    // ── Workflow instances ──

    /// Atomic check-then-insert. Fails with `Conflict` when the contract
    /// already has an active instance.
    async fn insert_active_instance(&self, instance: &WorkflowInstance) -> Result<()>;
    async fn load_instance(&self, instance_id: Uuid) -> Result<Option<WorkflowInstance>>;
    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<()>;
    async fn find_active_instance(&self, contract_id: Uuid) -> Result<Option<WorkflowInstance>>;
    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>>;

    // ── Stage action log (append-only) ──

    async fn append_stage_action(&self, action: &WorkflowStageAction) -> Result<()>;
    /// All actions for an instance, oldest first.
    async fn list_stage_actions(&self, instance_id: Uuid) -> Result<Vec<WorkflowStageAction>>;
    /// Most recent action for `(instance, stage)`: the stage-entry signal.
    async fn latest_stage_action(
        &self,
        instance_id: Uuid,
        stage_name: &str,
    ) -> Result<Option<WorkflowStageAction>>;

    // ── Escalation rules & events ──

    async fn save_escalation_rule(&self, rule: &EscalationRule) -> Result<()>;
    async fn list_rules_for_stage(
        &self,
        template_id: Uuid,
        stage_name: &str,
    ) -> Result<Vec<EscalationRule>>;
    /// Atomic check-then-insert. Fails with `Conflict` when an unresolved
    /// event already exists for `(instance, rule)`.
    async fn insert_escalation_event(&self, event: &EscalationEvent) -> Result<()>;
    async fn load_escalation_event(&self, event_id: Uuid) -> Result<Option<EscalationEvent>>;
    async fn update_escalation_event(&self, event: &EscalationEvent) -> Result<()>;
    async fn list_unresolved_events(&self) -> Result<Vec<EscalationEvent>>;

    // ── Signing sessions ──

    async fn save_session(&self, session: &SigningSession) -> Result<()>;
    async fn load_session(&self, session_id: Uuid) -> Result<Option<SigningSession>>;

    // ── Session signers ──

    async fn save_signer(&self, signer: &SessionSigner) -> Result<()>;
    async fn load_signer(&self, signer_id: Uuid) -> Result<Option<SessionSigner>>;
    /// All signers of a session, ordered by `signing_order`.
    async fn list_signers(&self, session_id: Uuid) -> Result<Vec<SessionSigner>>;
    async fn find_signer_by_token_digest(&self, digest: &str) -> Result<Option<SessionSigner>>;

    // ── Signing fields ──

    async fn save_field(&self, field: &SigningField) -> Result<()>;
    async fn list_fields_for_signer(&self, signer_id: Uuid) -> Result<Vec<SigningField>>;
    async fn list_fields_for_session(&self, session_id: Uuid) -> Result<Vec<SigningField>>;

    // ── Signing audit log (append-only) ──

    async fn append_signing_audit(&self, log: &SigningAuditLog) -> Result<()>;
    /// All audit rows for a session, oldest first.
    async fn list_signing_audit(&self, session_id: Uuid) -> Result<Vec<SigningAuditLog>>;

    // ── KYC packs ──

    async fn save_kyc_pack(&self, pack: &KycPack) -> Result<()>;
    async fn load_kyc_pack(&self, contract_id: Uuid) -> Result<Option<KycPack>>;

    // ── Signing authorities ──

    async fn save_authority(&self, authority: &SigningAuthority) -> Result<()>;
    async fn list_authorities_for_entity(&self, entity_id: Uuid) -> Result<Vec<SigningAuthority>>;
}
