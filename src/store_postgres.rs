//! Postgres Store
//!
//! Production backend. All SQL is runtime-checked (sqlx::query, not
//! sqlx::query!) to avoid a compile-time database requirement. The two
//! uniqueness invariants live in partial unique indexes (see migrations);
//! violation surfaces as `EngineError::Conflict`, same as the memory
//! backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::SigningAuditLog;
use crate::authority::SigningAuthority;
use crate::contract::{ContractRecord, ContractSigningStatus};
use crate::error::{EngineError, Result};
use crate::escalation::{EscalationEvent, EscalationRule, EscalationTarget};
use crate::kyc::{KycItemStatus, KycPack, KycPackItem};
use crate::session::{SessionSigner, SigningField, SigningSession};
use crate::state::{WorkflowInstance, WorkflowStageAction};
use crate::store::LifecycleStore;
use crate::template::{StageDef, TemplateStatus, WorkflowTemplate};

pub struct PgLifecycleStore {
    pool: PgPool,
}

impl PgLifecycleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a Postgres unique violation (23505) to a domain conflict; everything
/// else stays a database error.
fn conflict_on_unique(e: sqlx::Error, msg: String) -> EngineError {
    if let sqlx::Error::Database(ref db) = e {
        if db.code().as_deref() == Some("23505") {
            return EngineError::Conflict(msg);
        }
    }
    EngineError::Database(e)
}

#[async_trait]
impl LifecycleStore for PgLifecycleStore {
    // ── Contracts ──

    async fn save_contract(&self, contract: &ContractRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contracts
                (contract_id, title, entity_id, project_id, contract_type,
                 storage_path, workflow_state, signing_status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (contract_id) DO UPDATE SET
                title = EXCLUDED.title,
                entity_id = EXCLUDED.entity_id,
                project_id = EXCLUDED.project_id,
                contract_type = EXCLUDED.contract_type,
                storage_path = EXCLUDED.storage_path,
                workflow_state = EXCLUDED.workflow_state,
                signing_status = EXCLUDED.signing_status
            "#,
        )
        .bind(contract.contract_id)
        .bind(&contract.title)
        .bind(contract.entity_id)
        .bind(contract.project_id)
        .bind(&contract.contract_type)
        .bind(&contract.storage_path)
        .bind(&contract.workflow_state)
        .bind(contract.signing_status.as_str())
        .bind(contract.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_contract(&self, contract_id: Uuid) -> Result<Option<ContractRecord>> {
        let row = sqlx::query_as::<_, ContractRecord>(
            r#"
            SELECT contract_id, title, entity_id, project_id, contract_type,
                   storage_path, workflow_state, signing_status, created_at
            FROM contracts
            WHERE contract_id = $1
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_contract_workflow_state(&self, contract_id: Uuid, state: &str) -> Result<()> {
        let result = sqlx::query("UPDATE contracts SET workflow_state = $2 WHERE contract_id = $1")
            .bind(contract_id)
            .bind(state)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("contract {}", contract_id)));
        }
        Ok(())
    }

    async fn update_contract_signing_status(
        &self,
        contract_id: Uuid,
        status: ContractSigningStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE contracts SET signing_status = $2 WHERE contract_id = $1")
            .bind(contract_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("contract {}", contract_id)));
        }
        Ok(())
    }

    // ── Workflow templates ──

    async fn save_template(&self, template: &WorkflowTemplate) -> Result<()> {
        let stages = serde_json::to_value(&template.stages)?;
        sqlx::query(
            r#"
            INSERT INTO workflow_templates
                (template_id, version, name, contract_type, stages, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (template_id, version) DO UPDATE SET
                name = EXCLUDED.name,
                contract_type = EXCLUDED.contract_type,
                stages = EXCLUDED.stages,
                status = EXCLUDED.status
            "#,
        )
        .bind(template.template_id)
        .bind(template.version as i32)
        .bind(&template.name)
        .bind(&template.contract_type)
        .bind(stages)
        .bind(template.status.as_str())
        .bind(template.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_template(
        &self,
        template_id: Uuid,
        version: u32,
    ) -> Result<Option<WorkflowTemplate>> {
        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                i32,
                String,
                Option<String>,
                serde_json::Value,
                String,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT template_id, version, name, contract_type, stages, status, created_at
            FROM workflow_templates
            WHERE template_id = $1 AND version = $2
            "#,
        )
        .bind(template_id)
        .bind(version as i32)
        .fetch_optional(&self.pool)
        .await?;
        row.map(template_from_row).transpose()
    }

    async fn load_latest_published_template(
        &self,
        template_id: Uuid,
    ) -> Result<Option<WorkflowTemplate>> {
        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                i32,
                String,
                Option<String>,
                serde_json::Value,
                String,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT template_id, version, name, contract_type, stages, status, created_at
            FROM workflow_templates
            WHERE template_id = $1 AND status = 'published'
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(template_from_row).transpose()
    }

    // ── Workflow instances ──

    async fn insert_active_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (instance_id, contract_id, template_id, template_version,
                 current_stage, state, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(instance.instance_id)
        .bind(instance.contract_id)
        .bind(instance.template_id)
        .bind(instance.template_version)
        .bind(&instance.current_stage)
        .bind(instance.state.as_str())
        .bind(instance.started_at)
        .bind(instance.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(
                e,
                format!("active instance exists for contract {}", instance.contract_id),
            )
        })?;
        Ok(())
    }

    async fn load_instance(&self, instance_id: Uuid) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query_as::<_, WorkflowInstance>(
            r#"
            SELECT instance_id, contract_id, template_id, template_version,
                   current_stage, state, started_at, completed_at
            FROM workflow_instances
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_instances
            SET current_stage = $2, state = $3, completed_at = $4
            WHERE instance_id = $1
            "#,
        )
        .bind(instance.instance_id)
        .bind(&instance.current_stage)
        .bind(instance.state.as_str())
        .bind(instance.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_instance(&self, contract_id: Uuid) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query_as::<_, WorkflowInstance>(
            r#"
            SELECT instance_id, contract_id, template_id, template_version,
                   current_stage, state, started_at, completed_at
            FROM workflow_instances
            WHERE contract_id = $1 AND state = 'active'
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query_as::<_, WorkflowInstance>(
            r#"
            SELECT instance_id, contract_id, template_id, template_version,
                   current_stage, state, started_at, completed_at
            FROM workflow_instances
            WHERE state = 'active'
            ORDER BY started_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Stage action log ──

    async fn append_stage_action(&self, action: &WorkflowStageAction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_stage_actions
                (action_id, instance_id, stage_name, action, actor_id,
                 actor_email, comment, artifacts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(action.action_id)
        .bind(action.instance_id)
        .bind(&action.stage_name)
        .bind(action.action.as_str())
        .bind(action.actor_id)
        .bind(&action.actor_email)
        .bind(&action.comment)
        .bind(&action.artifacts)
        .bind(action.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_stage_actions(&self, instance_id: Uuid) -> Result<Vec<WorkflowStageAction>> {
        let rows = sqlx::query_as::<_, WorkflowStageAction>(
            r#"
            SELECT action_id, instance_id, stage_name, action, actor_id,
                   actor_email, comment, artifacts, created_at
            FROM workflow_stage_actions
            WHERE instance_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn latest_stage_action(
        &self,
        instance_id: Uuid,
        stage_name: &str,
    ) -> Result<Option<WorkflowStageAction>> {
        let row = sqlx::query_as::<_, WorkflowStageAction>(
            r#"
            SELECT action_id, instance_id, stage_name, action, actor_id,
                   actor_email, comment, artifacts, created_at
            FROM workflow_stage_actions
            WHERE instance_id = $1 AND stage_name = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(instance_id)
        .bind(stage_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Escalation rules & events ──

    async fn save_escalation_rule(&self, rule: &EscalationRule) -> Result<()> {
        let target = serde_json::to_value(&rule.escalate_to)?;
        sqlx::query(
            r#"
            INSERT INTO escalation_rules
                (rule_id, template_id, stage_name, sla_breach_hours, tier, escalate_to)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (rule_id) DO UPDATE SET
                sla_breach_hours = EXCLUDED.sla_breach_hours,
                tier = EXCLUDED.tier,
                escalate_to = EXCLUDED.escalate_to
            "#,
        )
        .bind(rule.rule_id)
        .bind(rule.template_id)
        .bind(&rule.stage_name)
        .bind(rule.sla_breach_hours)
        .bind(rule.tier)
        .bind(target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_rules_for_stage(
        &self,
        template_id: Uuid,
        stage_name: &str,
    ) -> Result<Vec<EscalationRule>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, i32, i32, serde_json::Value)>(
            r#"
            SELECT rule_id, template_id, stage_name, sla_breach_hours, tier, escalate_to
            FROM escalation_rules
            WHERE template_id = $1 AND stage_name = $2
            "#,
        )
        .bind(template_id)
        .bind(stage_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(rule_id, template_id, stage_name, sla_breach_hours, tier, target)| {
                let escalate_to: EscalationTarget = serde_json::from_value(target)?;
                Ok(EscalationRule {
                    rule_id,
                    template_id,
                    stage_name,
                    sla_breach_hours,
                    tier,
                    escalate_to,
                })
            })
            .collect()
    }

    async fn insert_escalation_event(&self, event: &EscalationEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO escalation_events
                (event_id, instance_id, rule_id, contract_id, stage_name,
                 tier, escalated_at, resolved_at, resolved_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_id)
        .bind(event.instance_id)
        .bind(event.rule_id)
        .bind(event.contract_id)
        .bind(&event.stage_name)
        .bind(event.tier)
        .bind(event.escalated_at)
        .bind(event.resolved_at)
        .bind(&event.resolved_by)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(
                e,
                format!(
                    "unresolved escalation exists for instance {} rule {}",
                    event.instance_id, event.rule_id
                ),
            )
        })?;
        Ok(())
    }

    async fn load_escalation_event(&self, event_id: Uuid) -> Result<Option<EscalationEvent>> {
        let row = sqlx::query_as::<_, EscalationEvent>(
            r#"
            SELECT event_id, instance_id, rule_id, contract_id, stage_name,
                   tier, escalated_at, resolved_at, resolved_by
            FROM escalation_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_escalation_event(&self, event: &EscalationEvent) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE escalation_events
            SET resolved_at = $2, resolved_by = $3
            WHERE event_id = $1
            "#,
        )
        .bind(event.event_id)
        .bind(event.resolved_at)
        .bind(&event.resolved_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unresolved_events(&self) -> Result<Vec<EscalationEvent>> {
        let rows = sqlx::query_as::<_, EscalationEvent>(
            r#"
            SELECT event_id, instance_id, rule_id, contract_id, stage_name,
                   tier, escalated_at, resolved_at, resolved_by
            FROM escalation_events
            WHERE resolved_at IS NULL
            ORDER BY escalated_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Signing sessions ──

    async fn save_session(&self, session: &SigningSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signing_sessions
                (session_id, contract_id, initiated_by, initiator_email,
                 signing_order, status, document_hash, final_document_hash,
                 final_storage_path, expires_at, completed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (session_id) DO UPDATE SET
                status = EXCLUDED.status,
                final_document_hash = EXCLUDED.final_document_hash,
                final_storage_path = EXCLUDED.final_storage_path,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(session.session_id)
        .bind(session.contract_id)
        .bind(session.initiated_by)
        .bind(&session.initiator_email)
        .bind(session.signing_order.as_str())
        .bind(session.status.as_str())
        .bind(&session.document_hash)
        .bind(&session.final_document_hash)
        .bind(&session.final_storage_path)
        .bind(session.expires_at)
        .bind(session.completed_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Option<SigningSession>> {
        let row = sqlx::query_as::<_, SigningSession>(
            r#"
            SELECT session_id, contract_id, initiated_by, initiator_email,
                   signing_order, status, document_hash, final_document_hash,
                   final_storage_path, expires_at, completed_at, created_at
            FROM signing_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Session signers ──

    async fn save_signer(&self, signer: &SessionSigner) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_signers
                (signer_id, session_id, name, email, kind, signing_order,
                 token_digest, token_expires_at, status, signature_path,
                 ip_address, user_agent, sent_at, viewed_at, signed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (signer_id) DO UPDATE SET
                token_digest = EXCLUDED.token_digest,
                token_expires_at = EXCLUDED.token_expires_at,
                status = EXCLUDED.status,
                signature_path = EXCLUDED.signature_path,
                ip_address = EXCLUDED.ip_address,
                user_agent = EXCLUDED.user_agent,
                sent_at = EXCLUDED.sent_at,
                viewed_at = EXCLUDED.viewed_at,
                signed_at = EXCLUDED.signed_at
            "#,
        )
        .bind(signer.signer_id)
        .bind(signer.session_id)
        .bind(&signer.name)
        .bind(&signer.email)
        .bind(signer.kind.as_str())
        .bind(signer.signing_order)
        .bind(&signer.token_digest)
        .bind(signer.token_expires_at)
        .bind(signer.status.as_str())
        .bind(&signer.signature_path)
        .bind(&signer.ip_address)
        .bind(&signer.user_agent)
        .bind(signer.sent_at)
        .bind(signer.viewed_at)
        .bind(signer.signed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_signer(&self, signer_id: Uuid) -> Result<Option<SessionSigner>> {
        let row = sqlx::query_as::<_, SessionSigner>(
            r#"
            SELECT signer_id, session_id, name, email, kind, signing_order,
                   token_digest, token_expires_at, status, signature_path,
                   ip_address, user_agent, sent_at, viewed_at, signed_at
            FROM session_signers
            WHERE signer_id = $1
            "#,
        )
        .bind(signer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_signers(&self, session_id: Uuid) -> Result<Vec<SessionSigner>> {
        let rows = sqlx::query_as::<_, SessionSigner>(
            r#"
            SELECT signer_id, session_id, name, email, kind, signing_order,
                   token_digest, token_expires_at, status, signature_path,
                   ip_address, user_agent, sent_at, viewed_at, signed_at
            FROM session_signers
            WHERE session_id = $1
            ORDER BY signing_order
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // The inbound token is digested before this lookup, so the equality
    // probe never touches raw secrets; the unique index makes it O(1).
    async fn find_signer_by_token_digest(&self, digest: &str) -> Result<Option<SessionSigner>> {
        let row = sqlx::query_as::<_, SessionSigner>(
            r#"
            SELECT signer_id, session_id, name, email, kind, signing_order,
                   token_digest, token_expires_at, status, signature_path,
                   ip_address, user_agent, sent_at, viewed_at, signed_at
            FROM session_signers
            WHERE token_digest = $1
            "#,
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Signing fields ──

    async fn save_field(&self, field: &SigningField) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signing_fields
                (field_id, session_id, signer_id, field_type, page_number,
                 x_position, y_position, width, height, is_required, value, filled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (field_id) DO UPDATE SET
                value = EXCLUDED.value,
                filled_at = EXCLUDED.filled_at
            "#,
        )
        .bind(field.field_id)
        .bind(field.session_id)
        .bind(field.signer_id)
        .bind(field.field_type.as_str())
        .bind(field.page_number)
        .bind(field.x_position)
        .bind(field.y_position)
        .bind(field.width)
        .bind(field.height)
        .bind(field.is_required)
        .bind(&field.value)
        .bind(field.filled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_fields_for_signer(&self, signer_id: Uuid) -> Result<Vec<SigningField>> {
        let rows = sqlx::query_as::<_, SigningField>(
            r#"
            SELECT field_id, session_id, signer_id, field_type, page_number,
                   x_position, y_position, width, height, is_required, value, filled_at
            FROM signing_fields
            WHERE signer_id = $1
            ORDER BY page_number
            "#,
        )
        .bind(signer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_fields_for_session(&self, session_id: Uuid) -> Result<Vec<SigningField>> {
        let rows = sqlx::query_as::<_, SigningField>(
            r#"
            SELECT field_id, session_id, signer_id, field_type, page_number,
                   x_position, y_position, width, height, is_required, value, filled_at
            FROM signing_fields
            WHERE session_id = $1
            ORDER BY page_number
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Signing audit log ──

    async fn append_signing_audit(&self, log: &SigningAuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signing_audit_log
                (log_id, session_id, signer_id, event, details,
                 ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.log_id)
        .bind(log.session_id)
        .bind(log.signer_id)
        .bind(log.event.as_str())
        .bind(&log.details)
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_signing_audit(&self, session_id: Uuid) -> Result<Vec<SigningAuditLog>> {
        let rows = sqlx::query_as::<_, SigningAuditLog>(
            r#"
            SELECT log_id, session_id, signer_id, event, details,
                   ip_address, user_agent, created_at
            FROM signing_audit_log
            WHERE session_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── KYC packs ──

    async fn save_kyc_pack(&self, pack: &KycPack) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kyc_packs (pack_id, contract_id, template_version, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (pack_id) DO NOTHING
            "#,
        )
        .bind(pack.pack_id)
        .bind(pack.contract_id)
        .bind(pack.template_version)
        .bind(pack.created_at)
        .execute(&self.pool)
        .await?;

        // Item statuses change over time; rewrite the snapshot rows.
        sqlx::query("DELETE FROM kyc_pack_items WHERE pack_id = $1")
            .bind(pack.pack_id)
            .execute(&self.pool)
            .await?;

        for item in &pack.items {
            sqlx::query(
                r#"
                INSERT INTO kyc_pack_items
                    (item_id, pack_id, label, is_required, status, completed_at, completed_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(item.item_id)
            .bind(pack.pack_id)
            .bind(&item.label)
            .bind(item.is_required)
            .bind(item.status.as_str())
            .bind(item.completed_at)
            .bind(&item.completed_by)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn load_kyc_pack(&self, contract_id: Uuid) -> Result<Option<KycPack>> {
        let pack = sqlx::query_as::<_, (Uuid, Uuid, i32, DateTime<Utc>)>(
            r#"
            SELECT pack_id, contract_id, template_version, created_at
            FROM kyc_packs
            WHERE contract_id = $1
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((pack_id, contract_id, template_version, created_at)) = pack else {
            return Ok(None);
        };

        let item_rows = sqlx::query_as::<
            _,
            (Uuid, String, bool, String, Option<DateTime<Utc>>, Option<String>),
        >(
            r#"
            SELECT item_id, label, is_required, status, completed_at, completed_by
            FROM kyc_pack_items
            WHERE pack_id = $1
            ORDER BY label
            "#,
        )
        .bind(pack_id)
        .fetch_all(&self.pool)
        .await?;

        let items = item_rows
            .into_iter()
            .map(|(item_id, label, is_required, status, completed_at, completed_by)| {
                let status: KycItemStatus =
                    status.parse().map_err(EngineError::InvalidInput)?;
                Ok(KycPackItem {
                    item_id,
                    label,
                    is_required,
                    status,
                    completed_at,
                    completed_by,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(KycPack {
            pack_id,
            contract_id,
            template_version,
            items,
            created_at,
        }))
    }

    // ── Signing authorities ──

    async fn save_authority(&self, authority: &SigningAuthority) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signing_authorities
                (authority_id, entity_id, project_id, contract_type_pattern,
                 user_id, user_email, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (authority_id) DO UPDATE SET
                project_id = EXCLUDED.project_id,
                contract_type_pattern = EXCLUDED.contract_type_pattern
            "#,
        )
        .bind(authority.authority_id)
        .bind(authority.entity_id)
        .bind(authority.project_id)
        .bind(&authority.contract_type_pattern)
        .bind(authority.user_id)
        .bind(&authority.user_email)
        .bind(authority.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_authorities_for_entity(&self, entity_id: Uuid) -> Result<Vec<SigningAuthority>> {
        let rows = sqlx::query_as::<_, SigningAuthority>(
            r#"
            SELECT authority_id, entity_id, project_id, contract_type_pattern,
                   user_id, user_email, created_at
            FROM signing_authorities
            WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn template_from_row(
    (template_id, version, name, contract_type, stages, status, created_at): (
        Uuid,
        i32,
        String,
        Option<String>,
        serde_json::Value,
        String,
        DateTime<Utc>,
    ),
) -> Result<WorkflowTemplate> {
    let stages: Vec<StageDef> = serde_json::from_value(stages)?;
    let status: TemplateStatus = status.parse().map_err(EngineError::InvalidInput)?;
    Ok(WorkflowTemplate {
        template_id,
        name,
        contract_type,
        stages,
        version: version as u32,
        status,
        created_at,
    })
}
