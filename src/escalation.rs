//! SLA Escalation
//!
//! Per-template-stage SLA thresholds and the scheduler pass that turns
//! breaches into escalation events. The pass is a pure function over
//! persisted state: no memory between invocations, safe to run from any
//! number of external periodic triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::error::{EngineError, Result};
use crate::notify::Notifier;
use crate::state::Actor;
use crate::store::LifecycleStore;

/// Where a breach is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "target")]
pub enum EscalationTarget {
    /// A role name; the notifier resolves membership downstream.
    Role(String),
    /// A specific user's email.
    User(String),
}

impl EscalationTarget {
    pub fn recipient(&self) -> &str {
        match self {
            Self::Role(role) => role,
            Self::User(email) => email,
        }
    }
}

/// SLA threshold for one stage of one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub rule_id: Uuid,
    pub template_id: Uuid,
    pub stage_name: String,
    /// Hours in-stage before the rule fires. Positive.
    pub sla_breach_hours: i32,
    /// Severity tier of the resulting event. Positive.
    pub tier: i32,
    pub escalate_to: EscalationTarget,
}

impl EscalationRule {
    pub fn new(
        template_id: Uuid,
        stage_name: impl Into<String>,
        sla_breach_hours: i32,
        tier: i32,
        escalate_to: EscalationTarget,
    ) -> Self {
        Self {
            rule_id: Uuid::new_v4(),
            template_id,
            stage_name: stage_name.into(),
            sla_breach_hours,
            tier,
            escalate_to,
        }
    }
}

/// A concrete breach record. Created only by the scheduler pass; mutated
/// only by resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct EscalationEvent {
    pub event_id: Uuid,
    pub instance_id: Uuid,
    pub rule_id: Uuid,
    pub contract_id: Uuid,
    pub stage_name: String,
    pub tier: i32,
    pub escalated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl EscalationEvent {
    pub fn from_rule(rule: &EscalationRule, instance_id: Uuid, contract_id: Uuid) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            instance_id,
            rule_id: rule.rule_id,
            contract_id,
            stage_name: rule.stage_name.clone(),
            tier: rule.tier,
            escalated_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// The scheduler pass over active workflow instances.
pub struct EscalationEngine {
    store: Arc<dyn LifecycleStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
        }
    }

    /// Scan every active instance against its stage's rules and create one
    /// event per newly-breached rule. Returns the number created.
    ///
    /// Stage entry time is the `created_at` of the most recent stage action
    /// for `(instance, current_stage)`, falling back to `started_at`; a
    /// stage re-entered via rework counts as freshly entered.
    ///
    /// Concurrent passes are safe: the store's uniqueness check turns the
    /// duplicate insert into a conflict, which this pass treats as "someone
    /// else got there first".
    pub async fn check_sla_breaches(&self) -> Result<usize> {
        let mut created = 0;

        for instance in self.store.list_active_instances().await? {
            let rules = self
                .store
                .list_rules_for_stage(instance.template_id, &instance.current_stage)
                .await?;
            if rules.is_empty() {
                continue;
            }

            let entered_at = match self
                .store
                .latest_stage_action(instance.instance_id, &instance.current_stage)
                .await?
            {
                Some(action) => action.created_at,
                None => instance.started_at,
            };
            let hours_in_stage = (Utc::now() - entered_at).num_hours();

            for rule in rules {
                if hours_in_stage < rule.sla_breach_hours as i64 {
                    continue;
                }

                let event =
                    EscalationEvent::from_rule(&rule, instance.instance_id, instance.contract_id);
                match self.store.insert_escalation_event(&event).await {
                    Ok(()) => {}
                    Err(EngineError::Conflict(_)) => continue, // unresolved event already open
                    Err(e) => return Err(e),
                }

                tracing::info!(
                    instance_id = %instance.instance_id,
                    stage = %instance.current_stage,
                    tier = rule.tier,
                    hours_in_stage,
                    "SLA breach escalated"
                );

                // Notification is best-effort; the event is the source of
                // truth and is never rolled back on delivery failure.
                if let Err(e) = self
                    .notifier
                    .send(
                        rule.escalate_to.recipient(),
                        "Escalation: SLA breach",
                        &format!(
                            "Contract {} stage {} has breached its {}h SLA (tier {}).",
                            instance.contract_id,
                            instance.current_stage,
                            rule.sla_breach_hours,
                            rule.tier
                        ),
                    )
                    .await
                {
                    tracing::error!(
                        event_id = %event.event_id,
                        error = %e,
                        "failed to deliver escalation notification"
                    );
                }

                created += 1;
            }
        }

        Ok(created)
    }

    /// Stamp an event resolved. Re-resolving an already-resolved event is a
    /// no-op returning the stored record unchanged.
    pub async fn resolve_escalation(
        &self,
        event_id: Uuid,
        actor: &Actor,
    ) -> Result<EscalationEvent> {
        let mut event = self
            .store
            .load_escalation_event(event_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("escalation event {}", event_id)))?;

        if event.is_resolved() {
            return Ok(event);
        }

        event.resolved_at = Some(Utc::now());
        event.resolved_by = Some(actor.email.clone());
        self.store.update_escalation_event(&event).await?;

        self.audit
            .append(
                AuditRecord::new("escalation_resolved", "escalation_event", event.event_id)
                    .by(actor.email.clone()),
            )
            .await?;

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_recipient() {
        assert_eq!(EscalationTarget::Role("legal".into()).recipient(), "legal");
        assert_eq!(
            EscalationTarget::User("gc@x.test".into()).recipient(),
            "gc@x.test"
        );
    }

    #[test]
    fn event_from_rule_is_unresolved() {
        let rule = EscalationRule::new(
            Uuid::new_v4(),
            "review",
            24,
            1,
            EscalationTarget::Role("legal".into()),
        );
        let event = EscalationEvent::from_rule(&rule, Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(event.tier, 1);
        assert_eq!(event.stage_name, "review");
        assert!(!event.is_resolved());
    }
}
