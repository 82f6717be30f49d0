//! In-Memory Store
//!
//! Reference backend for the POC and for tests. One lock guards all state,
//! so the atomic check-then-insert contracts hold trivially; the Postgres
//! backend enforces the same invariants with partial unique indexes.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::SigningAuditLog;
use crate::authority::SigningAuthority;
use crate::contract::{ContractRecord, ContractSigningStatus};
use crate::error::{EngineError, Result};
use crate::escalation::{EscalationEvent, EscalationRule};
use crate::kyc::KycPack;
use crate::session::{SessionSigner, SigningField, SigningSession};
use crate::state::{InstanceState, WorkflowInstance, WorkflowStageAction};
use crate::store::LifecycleStore;
use crate::template::WorkflowTemplate;
use crate::token;

#[derive(Default)]
struct Inner {
    contracts: HashMap<Uuid, ContractRecord>,
    /// Keyed by `(template_id, version)`.
    templates: HashMap<(Uuid, u32), WorkflowTemplate>,
    instances: HashMap<Uuid, WorkflowInstance>,
    stage_actions: Vec<WorkflowStageAction>,
    rules: Vec<EscalationRule>,
    events: HashMap<Uuid, EscalationEvent>,
    sessions: HashMap<Uuid, SigningSession>,
    signers: HashMap<Uuid, SessionSigner>,
    fields: HashMap<Uuid, SigningField>,
    signing_audit: Vec<SigningAuditLog>,
    /// Keyed by contract id: one pack per contract.
    kyc_packs: HashMap<Uuid, KycPack>,
    authorities: Vec<SigningAuthority>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleStore for MemoryStore {
    // ── Contracts ──

    async fn save_contract(&self, contract: &ContractRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .contracts
            .insert(contract.contract_id, contract.clone());
        Ok(())
    }

    async fn load_contract(&self, contract_id: Uuid) -> Result<Option<ContractRecord>> {
        Ok(self.inner.read().await.contracts.get(&contract_id).cloned())
    }

    async fn update_contract_workflow_state(&self, contract_id: Uuid, state: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let contract = inner
            .contracts
            .get_mut(&contract_id)
            .ok_or_else(|| EngineError::NotFound(format!("contract {}", contract_id)))?;
        contract.workflow_state = Some(state.to_string());
        Ok(())
    }

    async fn update_contract_signing_status(
        &self,
        contract_id: Uuid,
        status: ContractSigningStatus,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let contract = inner
            .contracts
            .get_mut(&contract_id)
            .ok_or_else(|| EngineError::NotFound(format!("contract {}", contract_id)))?;
        contract.signing_status = status;
        Ok(())
    }

    // ── Workflow templates ──

    async fn save_template(&self, template: &WorkflowTemplate) -> Result<()> {
        self.inner
            .write()
            .await
            .templates
            .insert((template.template_id, template.version), template.clone());
        Ok(())
    }

    async fn load_template(
        &self,
        template_id: Uuid,
        version: u32,
    ) -> Result<Option<WorkflowTemplate>> {
        Ok(self
            .inner
            .read()
            .await
            .templates
            .get(&(template_id, version))
            .cloned())
    }

    async fn load_latest_published_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<WorkflowTemplate>> {
        Ok(self
            .inner
            .read()
            .await
            .templates
            .values()
            .filter(|t| t.template_id == template_id && t.is_published())
            .max_by_key(|t| t.version)
            .cloned())
    }

    // ── Workflow instances ──

    async fn insert_active_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.instances.values().any(|i| {
            i.contract_id == instance.contract_id && i.state == InstanceState::Active
        });
        if duplicate {
            return Err(EngineError::Conflict(format!(
                "active instance exists for contract {}",
                instance.contract_id
            )));
        }
        inner.instances.insert(instance.instance_id, instance.clone());
        Ok(())
    }

    async fn load_instance(&self, instance_id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self.inner.read().await.instances.get(&instance_id).cloned())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        self.inner
            .write()
            .await
            .instances
            .insert(instance.instance_id, instance.clone());
        Ok(())
    }

    async fn find_active_instance(&self, contract_id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .inner
            .read()
            .await
            .instances
            .values()
            .find(|i| i.contract_id == contract_id && i.state == InstanceState::Active)
            .cloned())
    }

    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>> {
        let mut active: Vec<WorkflowInstance> = self
            .inner
            .read()
            .await
            .instances
            .values()
            .filter(|i| i.state == InstanceState::Active)
            .cloned()
            .collect();
        active.sort_by_key(|i| i.started_at);
        Ok(active)
    }

    // ── Stage action log ──

    async fn append_stage_action(&self, action: &WorkflowStageAction) -> Result<()> {
        self.inner.write().await.stage_actions.push(action.clone());
        Ok(())
    }

    async fn list_stage_actions(&self, instance_id: Uuid) -> Result<Vec<WorkflowStageAction>> {
        Ok(self
            .inner
            .read()
            .await
            .stage_actions
            .iter()
            .filter(|a| a.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn latest_stage_action(
        &self,
        instance_id: Uuid,
        stage_name: &str,
    ) -> Result<Option<WorkflowStageAction>> {
        Ok(self
            .inner
            .read()
            .await
            .stage_actions
            .iter()
            .rev()
            .find(|a| a.instance_id == instance_id && a.stage_name == stage_name)
            .cloned())
    }

    // ── Escalation rules & events ──

    async fn save_escalation_rule(&self, rule: &EscalationRule) -> Result<()> {
        self.inner.write().await.rules.push(rule.clone());
        Ok(())
    }

    async fn list_rules_for_stage(
        &self,
        template_id: Uuid,
        stage_name: &str,
    ) -> Result<Vec<EscalationRule>> {
        Ok(self
            .inner
            .read()
            .await
            .rules
            .iter()
            .filter(|r| r.template_id == template_id && r.stage_name == stage_name)
            .cloned()
            .collect())
    }

    async fn insert_escalation_event(&self, event: &EscalationEvent) -> Result<()> {
        let mut inner = self.inner.write().await;
        let open = inner.events.values().any(|e| {
            e.instance_id == event.instance_id
                && e.rule_id == event.rule_id
                && e.resolved_at.is_none()
        });
        if open {
            return Err(EngineError::Conflict(format!(
                "unresolved escalation exists for instance {} rule {}",
                event.instance_id, event.rule_id
            )));
        }
        inner.events.insert(event.event_id, event.clone());
        Ok(())
    }

    async fn load_escalation_event(&self, event_id: Uuid) -> Result<Option<EscalationEvent>> {
        Ok(self.inner.read().await.events.get(&event_id).cloned())
    }

    async fn update_escalation_event(&self, event: &EscalationEvent) -> Result<()> {
        self.inner
            .write()
            .await
            .events
            .insert(event.event_id, event.clone());
        Ok(())
    }

    async fn list_unresolved_events(&self) -> Result<Vec<EscalationEvent>> {
        let mut open: Vec<EscalationEvent> = self
            .inner
            .read()
            .await
            .events
            .values()
            .filter(|e| e.resolved_at.is_none())
            .cloned()
            .collect();
        open.sort_by_key(|e| e.escalated_at);
        Ok(open)
    }

    // ── Signing sessions ──

    async fn save_session(&self, session: &SigningSession) -> Result<()> {
        self.inner
            .write()
            .await
            .sessions
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Option<SigningSession>> {
        Ok(self.inner.read().await.sessions.get(&session_id).cloned())
    }

    // ── Session signers ──

    async fn save_signer(&self, signer: &SessionSigner) -> Result<()> {
        self.inner
            .write()
            .await
            .signers
            .insert(signer.signer_id, signer.clone());
        Ok(())
    }

    async fn load_signer(&self, signer_id: Uuid) -> Result<Option<SessionSigner>> {
        Ok(self.inner.read().await.signers.get(&signer_id).cloned())
    }

    async fn list_signers(&self, session_id: Uuid) -> Result<Vec<SessionSigner>> {
        let mut signers: Vec<SessionSigner> = self
            .inner
            .read()
            .await
            .signers
            .values()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect();
        signers.sort_by_key(|s| s.signing_order);
        Ok(signers)
    }

    async fn find_signer_by_token_digest(&self, digest: &str) -> Result<Option<SessionSigner>> {
        Ok(self
            .inner
            .read()
            .await
            .signers
            .values()
            .find(|s| {
                s.token_digest
                    .as_deref()
                    .map(|stored| token::digest_matches(stored, digest))
                    .unwrap_or(false)
            })
            .cloned())
    }

    // ── Signing fields ──

    async fn save_field(&self, field: &SigningField) -> Result<()> {
        self.inner
            .write()
            .await
            .fields
            .insert(field.field_id, field.clone());
        Ok(())
    }

    async fn list_fields_for_signer(&self, signer_id: Uuid) -> Result<Vec<SigningField>> {
        let mut fields: Vec<SigningField> = self
            .inner
            .read()
            .await
            .fields
            .values()
            .filter(|f| f.signer_id == signer_id)
            .cloned()
            .collect();
        fields.sort_by_key(|f| (f.page_number, f.field_id));
        Ok(fields)
    }

    async fn list_fields_for_session(&self, session_id: Uuid) -> Result<Vec<SigningField>> {
        let mut fields: Vec<SigningField> = self
            .inner
            .read()
            .await
            .fields
            .values()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect();
        fields.sort_by_key(|f| (f.page_number, f.field_id));
        Ok(fields)
    }

    // ── Signing audit log ──

    async fn append_signing_audit(&self, log: &SigningAuditLog) -> Result<()> {
        self.inner.write().await.signing_audit.push(log.clone());
        Ok(())
    }

    async fn list_signing_audit(&self, session_id: Uuid) -> Result<Vec<SigningAuditLog>> {
        Ok(self
            .inner
            .read()
            .await
            .signing_audit
            .iter()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect())
    }

    // ── KYC packs ──

    async fn save_kyc_pack(&self, pack: &KycPack) -> Result<()> {
        self.inner
            .write()
            .await
            .kyc_packs
            .insert(pack.contract_id, pack.clone());
        Ok(())
    }

    async fn load_kyc_pack(&self, contract_id: Uuid) -> Result<Option<KycPack>> {
        Ok(self.inner.read().await.kyc_packs.get(&contract_id).cloned())
    }

    // ── Signing authorities ──

    async fn save_authority(&self, authority: &SigningAuthority) -> Result<()> {
        self.inner.write().await.authorities.push(authority.clone());
        Ok(())
    }

    async fn list_authorities_for_entity(&self, entity_id: Uuid) -> Result<Vec<SigningAuthority>> {
        Ok(self
            .inner
            .read()
            .await
            .authorities
            .iter()
            .filter(|a| a.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
