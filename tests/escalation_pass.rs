//! SLA escalation scheduler behavior over the in-memory store.

use std::sync::Arc;
use uuid::Uuid;

use chrono::{Duration, Utc};
use clm_engine::{
    Actor, ContractRecord, EscalationEngine, EscalationRule, EscalationTarget, LifecycleStore,
    MemoryStore, NoopAuditSink, RecordingNotifier, StageAction, StageDef, StageType,
    WorkflowInstance, WorkflowStageAction, WorkflowTemplate,
};

struct Harness {
    store: Arc<dyn LifecycleStore>,
    notifier: Arc<RecordingNotifier>,
    engine: EscalationEngine,
}

fn harness() -> Harness {
    let store: Arc<dyn LifecycleStore> = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = EscalationEngine::new(store.clone(), notifier.clone(), Arc::new(NoopAuditSink));
    Harness {
        store,
        notifier,
        engine,
    }
}

/// Template `[review (24h SLA), sign]`, one instance sitting in review for
/// `hours_in_stage` hours.
async fn seed_stale_instance(h: &Harness, hours_in_stage: i64) -> (WorkflowInstance, EscalationRule) {
    let mut template = WorkflowTemplate::new(
        "standard",
        vec![
            StageDef::new("review", StageType::Review),
            StageDef::new("sign", StageType::Signing),
        ],
    );
    template.publish().unwrap();
    h.store.save_template(&template).await.unwrap();

    let contract = ContractRecord::new("Stale MSA", Uuid::new_v4(), "msa");
    h.store.save_contract(&contract).await.unwrap();

    let rule = EscalationRule::new(
        template.template_id,
        "review",
        24,
        1,
        EscalationTarget::Role("legal".into()),
    );
    h.store.save_escalation_rule(&rule).await.unwrap();

    let mut instance = WorkflowInstance::new(contract.contract_id, &template, "review");
    instance.started_at = Utc::now() - Duration::hours(hours_in_stage);
    h.store.insert_active_instance(&instance).await.unwrap();

    (instance, rule)
}

#[tokio::test]
async fn breach_creates_exactly_one_event_per_rule() {
    let h = harness();
    let (instance, rule) = seed_stale_instance(&h, 30).await;

    let created = h.engine.check_sla_breaches().await.unwrap();
    assert_eq!(created, 1);

    let open = h.store.list_unresolved_events().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].instance_id, instance.instance_id);
    assert_eq!(open[0].rule_id, rule.rule_id);
    assert_eq!(open[0].tier, 1);
    assert_eq!(open[0].stage_name, "review");

    // The configured role was notified
    assert_eq!(h.notifier.sent_to("legal").await.len(), 1);

    // An immediate second pass creates nothing new
    let created = h.engine.check_sla_breaches().await.unwrap();
    assert_eq!(created, 0);
    assert_eq!(h.store.list_unresolved_events().await.unwrap().len(), 1);
}

#[tokio::test]
async fn within_sla_instances_are_left_alone() {
    let h = harness();
    seed_stale_instance(&h, 10).await;

    let created = h.engine.check_sla_breaches().await.unwrap();
    assert_eq!(created, 0);
    assert!(h.store.list_unresolved_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn rework_resets_the_stage_clock() {
    let h = harness();
    let (instance, _) = seed_stale_instance(&h, 30).await;

    // A fresh rework action re-enters the stage just now
    let actor = Actor::new(Uuid::new_v4(), "reviewer@x.test");
    let action = WorkflowStageAction::new(
        instance.instance_id,
        "review",
        StageAction::Rework,
        &actor,
    );
    h.store.append_stage_action(&action).await.unwrap();

    let created = h.engine.check_sla_breaches().await.unwrap();
    assert_eq!(created, 0);
}

#[tokio::test]
async fn resolution_allows_a_fresh_escalation() {
    let h = harness();
    seed_stale_instance(&h, 30).await;
    let actor = Actor::new(Uuid::new_v4(), "legal-lead@x.test");

    assert_eq!(h.engine.check_sla_breaches().await.unwrap(), 1);
    let open = h.store.list_unresolved_events().await.unwrap();

    let resolved = h
        .engine
        .resolve_escalation(open[0].event_id, &actor)
        .await
        .unwrap();
    assert!(resolved.is_resolved());
    assert_eq!(resolved.resolved_by.as_deref(), Some("legal-lead@x.test"));

    // The breach persists, so the next pass opens a new event
    assert_eq!(h.engine.check_sla_breaches().await.unwrap(), 1);
}

#[tokio::test]
async fn resolving_twice_is_idempotent() {
    let h = harness();
    seed_stale_instance(&h, 30).await;
    let first_actor = Actor::new(Uuid::new_v4(), "first@x.test");
    let second_actor = Actor::new(Uuid::new_v4(), "second@x.test");

    h.engine.check_sla_breaches().await.unwrap();
    let open = h.store.list_unresolved_events().await.unwrap();
    let event_id = open[0].event_id;

    let first = h.engine.resolve_escalation(event_id, &first_actor).await.unwrap();
    let second = h.engine.resolve_escalation(event_id, &second_actor).await.unwrap();

    // The second call changes nothing
    assert_eq!(second.resolved_by, first.resolved_by);
    assert_eq!(second.resolved_at, first.resolved_at);
}

#[tokio::test]
async fn multiple_tiers_fire_independently() {
    let h = harness();
    let (instance, _) = seed_stale_instance(&h, 80).await;

    // A second, slower tier on the same stage
    let tier2 = EscalationRule::new(
        instance.template_id,
        "review",
        72,
        2,
        EscalationTarget::User("gc@x.test".into()),
    );
    h.store.save_escalation_rule(&tier2).await.unwrap();

    let created = h.engine.check_sla_breaches().await.unwrap();
    assert_eq!(created, 2);

    let mut tiers: Vec<i32> = h
        .store
        .list_unresolved_events()
        .await
        .unwrap()
        .iter()
        .map(|e| e.tier)
        .collect();
    tiers.sort();
    assert_eq!(tiers, vec![1, 2]);
    assert_eq!(h.notifier.sent_to("gc@x.test").await.len(), 1);
}

#[tokio::test]
async fn completed_instances_are_not_scanned() {
    let h = harness();
    let (mut instance, _) = seed_stale_instance(&h, 30).await;

    instance.state = clm_engine::InstanceState::Completed;
    instance.completed_at = Some(Utc::now());
    h.store.update_instance(&instance).await.unwrap();

    assert_eq!(h.engine.check_sla_breaches().await.unwrap(), 0);
}

#[tokio::test]
async fn rules_for_other_stages_do_not_fire() {
    let h = harness();
    let (instance, _) = seed_stale_instance(&h, 30).await;

    // Rule on the sign stage; instance sits in review
    let sign_rule = EscalationRule::new(
        instance.template_id,
        "sign",
        1,
        1,
        EscalationTarget::Role("legal".into()),
    );
    h.store.save_escalation_rule(&sign_rule).await.unwrap();

    let created = h.engine.check_sla_breaches().await.unwrap();
    // Only the review rule fires
    assert_eq!(created, 1);
    let open = h.store.list_unresolved_events().await.unwrap();
    assert!(open.iter().all(|e| e.stage_name == "review"));
}
