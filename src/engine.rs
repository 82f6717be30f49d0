//! Workflow Engine
//!
//! Owns workflow instance state and stage transitions. The current stage is
//! a single authoritative field on the instance aggregate, mutated only
//! here; the append-only action log is the audit trail and the stage-entry
//! signal the escalation scheduler reads.
//!
//! Signing and countersign stages are gated before an approve is accepted:
//! the KYC gate must pass, and countersign additionally needs a matching
//! signing authority. Gating failures are synchronous domain errors and
//! never advance state.

use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::authority::AuthorityResolver;
use crate::error::{EngineError, Result};
use crate::kyc::KycGate;
use crate::notify::Notifier;
use crate::state::{Actor, InstanceState, StageAction, WorkflowInstance, WorkflowStageAction};
use crate::store::LifecycleStore;
use crate::template::WorkflowTemplate;

pub struct WorkflowEngine {
    store: Arc<dyn LifecycleStore>,
    kyc_gate: Arc<dyn KycGate>,
    authority: Arc<dyn AuthorityResolver>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        kyc_gate: Arc<dyn KycGate>,
        authority: Arc<dyn AuthorityResolver>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            kyc_gate,
            authority,
            notifier,
            audit,
        }
    }

    /// Start a workflow on a contract from the latest published version of
    /// a template. At most one active instance per contract; the duplicate
    /// check is store-enforced so concurrent starts serialize.
    pub async fn start_workflow(
        &self,
        contract_id: Uuid,
        template_id: Uuid,
        actor: &Actor,
    ) -> Result<WorkflowInstance> {
        let template = self
            .store
            .load_latest_published_template(template_id)
            .await?
            .ok_or(EngineError::TemplateNotPublished(template_id))?;

        let contract = self
            .store
            .load_contract(contract_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("contract {}", contract_id)))?;

        let first_stage = template
            .first_stage()
            .ok_or_else(|| EngineError::InvalidInput("template has no stages".to_string()))?
            .name
            .clone();

        let instance = WorkflowInstance::new(contract.contract_id, &template, &first_stage);
        match self.store.insert_active_instance(&instance).await {
            Ok(()) => {}
            Err(EngineError::Conflict(_)) => {
                return Err(EngineError::WorkflowAlreadyActive(contract_id));
            }
            Err(e) => return Err(e),
        }

        self.store
            .update_contract_workflow_state(contract_id, &first_stage)
            .await?;

        self.audit
            .append(
                AuditRecord::new("workflow_instance.start", "workflow_instance", instance.instance_id)
                    .by(actor.email.clone()),
            )
            .await?;

        tracing::info!(
            instance_id = %instance.instance_id,
            contract_id = %contract_id,
            template_version = instance.template_version,
            stage = %first_stage,
            "workflow started"
        );

        Ok(instance)
    }

    /// Record a stage decision and apply its transition.
    pub async fn record_action(
        &self,
        instance_id: Uuid,
        stage_name: &str,
        action: StageAction,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<WorkflowStageAction> {
        let mut instance = self
            .store
            .load_instance(instance_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow instance {}", instance_id)))?;

        if !instance.is_active() {
            return Err(EngineError::WorkflowTerminal(instance_id));
        }
        if instance.current_stage != stage_name {
            return Err(EngineError::StaleStage {
                current: instance.current_stage.clone(),
                requested: stage_name.to_string(),
            });
        }

        // In-flight instances act on the stage list they captured at start,
        // never on later template versions.
        let template = self
            .store
            .load_template(instance.template_id, instance.template_version as u32)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "template {} v{}",
                    instance.template_id, instance.template_version
                ))
            })?;

        let stage = template.stage(stage_name).ok_or_else(|| {
            EngineError::NotFound(format!("stage '{}' in template {}", stage_name, template.template_id))
        })?;

        if action.is_gated() {
            self.check_gates(&instance, stage_name, stage.stage_type).await?;
        }

        let row = WorkflowStageAction::new(instance_id, stage_name, action, actor)
            .with_comment(comment);
        self.store.append_stage_action(&row).await?;

        self.apply_transition(&mut instance, &template, action).await?;

        self.audit
            .append(
                AuditRecord::new(
                    format!("workflow_stage.{}", action),
                    "workflow_instance",
                    instance_id,
                )
                .with_details(serde_json::json!({ "stage": stage_name }))
                .by(actor.email.clone()),
            )
            .await?;

        Ok(row)
    }

    /// The contract's active instance, if any.
    pub async fn active_instance(&self, contract_id: Uuid) -> Result<Option<WorkflowInstance>> {
        self.store.find_active_instance(contract_id).await
    }

    /// Full action history for an instance, oldest first.
    pub async fn history(&self, instance_id: Uuid) -> Result<Vec<WorkflowStageAction>> {
        self.store.list_stage_actions(instance_id).await
    }

    async fn check_gates(
        &self,
        instance: &WorkflowInstance,
        stage_name: &str,
        stage_type: crate::template::StageType,
    ) -> Result<()> {
        if stage_type.requires_kyc_gate()
            && !self.kyc_gate.is_ready_for_signing(instance.contract_id).await?
        {
            let missing = self.kyc_gate.missing_count(instance.contract_id).await?;
            return Err(EngineError::KycIncomplete { missing });
        }

        if stage_type.requires_signing_authority() {
            let contract = self
                .store
                .load_contract(instance.contract_id)
                .await?
                .ok_or_else(|| {
                    EngineError::NotFound(format!("contract {}", instance.contract_id))
                })?;
            let covered = self
                .authority
                .has_authority(contract.entity_id, contract.project_id, &contract.contract_type)
                .await?;
            if !covered {
                return Err(EngineError::NoSigningAuthority {
                    entity_id: contract.entity_id,
                    stage: stage_name.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn apply_transition(
        &self,
        instance: &mut WorkflowInstance,
        template: &WorkflowTemplate,
        action: StageAction,
    ) -> Result<()> {
        let index = template
            .stage_index(&instance.current_stage)
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "stage '{}' in template {}",
                    instance.current_stage, template.template_id
                ))
            })?;

        match action {
            StageAction::Approve | StageAction::Skip => {
                if let Some(next) = template.stages.get(index + 1) {
                    self.enter_stage(instance, template, next.name.clone()).await?;
                } else {
                    instance.state = InstanceState::Completed;
                    instance.completed_at = Some(chrono::Utc::now());
                    self.store.update_instance(instance).await?;
                    self.store
                        .update_contract_workflow_state(instance.contract_id, "completed")
                        .await?;
                    tracing::info!(
                        instance_id = %instance.instance_id,
                        contract_id = %instance.contract_id,
                        "workflow completed"
                    );
                }
            }
            StageAction::Reject => {
                if index > 0 {
                    let previous = template.stages[index - 1].name.clone();
                    self.enter_stage(instance, template, previous).await?;
                }
                // Rejecting the first stage stays put; the logged action
                // still re-enters it for escalation purposes.
            }
            StageAction::Rework => {
                // Stay in place. The appended action row is the stage-scoped
                // reset: entry time derivation now sees a fresh re-entry.
            }
        }

        Ok(())
    }

    async fn enter_stage(
        &self,
        instance: &mut WorkflowInstance,
        template: &WorkflowTemplate,
        stage_name: String,
    ) -> Result<()> {
        instance.current_stage = stage_name.clone();
        self.store.update_instance(instance).await?;
        self.store
            .update_contract_workflow_state(instance.contract_id, &stage_name)
            .await?;

        // Route the new stage to its owning role, best-effort.
        if let Some(role) = template.stage(&stage_name).and_then(|s| s.owner_role.as_deref()) {
            if let Err(e) = self
                .notifier
                .send(
                    role,
                    "Contract stage ready for action",
                    &format!(
                        "Contract {} entered stage '{}'.",
                        instance.contract_id, stage_name
                    ),
                )
                .await
            {
                tracing::warn!(
                    instance_id = %instance.instance_id,
                    stage = %stage_name,
                    error = %e,
                    "failed to notify stage owner"
                );
            }
        }

        Ok(())
    }
}
