//! End-to-end signing session protocol over the in-memory backends.

use std::sync::Arc;
use uuid::Uuid;

use clm_engine::{
    Actor, BlobStore, ContractRecord, ContractSigningStatus, EngineError, FieldType, FieldValue,
    LifecycleStore, MemoryBlobStore, MemoryStore, NetworkMeta, RecordingNotifier, SessionStatus,
    SignerSpec, SignerStatus, SigningEngine, SigningEvent, SigningField, SigningOrder,
    StampRenderer,
};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-signature-bytes";
const SOURCE_PDF: &[u8] = b"%PDF-1.7 the contract body";

struct Harness {
    store: Arc<dyn LifecycleStore>,
    blobs: Arc<MemoryBlobStore>,
    notifier: Arc<RecordingNotifier>,
    engine: SigningEngine,
    actor: Actor,
    meta: NetworkMeta,
}

fn harness() -> Harness {
    let store: Arc<dyn LifecycleStore> = Arc::new(MemoryStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = SigningEngine::new(
        store.clone(),
        blobs.clone(),
        Arc::new(StampRenderer),
        notifier.clone(),
    );
    Harness {
        store,
        blobs,
        notifier,
        engine,
        actor: Actor::new(Uuid::new_v4(), "ops@x.test"),
        meta: NetworkMeta::new("10.1.2.3", "integration-test"),
    }
}

async fn seed_contract(h: &Harness) -> ContractRecord {
    let blob_ref = h
        .blobs
        .store("contracts/msa.pdf", SOURCE_PDF, "application/pdf")
        .await
        .unwrap();
    let contract = ContractRecord::new("Master Services Agreement", Uuid::new_v4(), "msa")
        .with_storage_path(blob_ref);
    h.store.save_contract(&contract).await.unwrap();
    contract
}

fn two_signers() -> Vec<SignerSpec> {
    vec![
        SignerSpec::external("Ada Lovelace", "ada@x.test"),
        SignerSpec::external("Grace Hopper", "grace@x.test"),
    ]
}

#[tokio::test]
async fn create_session_fingerprints_the_source_document() {
    let h = harness();
    let contract = seed_contract(&h).await;

    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.document_hash.len(), 64);

    let signers = h.store.list_signers(session.session_id).await.unwrap();
    assert_eq!(signers.len(), 2);
    assert_eq!(signers[0].signing_order, 0);
    assert_eq!(signers[1].signing_order, 1);
    assert!(signers.iter().all(|s| s.status == SignerStatus::Pending));

    let trail = h.engine.audit_trail(session.session_id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].event, SigningEvent::Created);
}

#[tokio::test]
async fn create_session_requires_a_source_document() {
    let h = harness();
    let contract = ContractRecord::new("No document yet", Uuid::new_v4(), "msa");
    h.store.save_contract(&contract).await.unwrap();

    let err = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn sequential_session_sends_to_next_signer_before_completing() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();
    let (a, b) = (&signers[0], &signers[1]);

    let raw_a = h.engine.send_to_signer(a.signer_id, &h.meta).await.unwrap();
    h.engine.validate_token(&raw_a, &h.meta).await.unwrap();
    h.engine
        .capture_signature(a.signer_id, &[], PNG, &h.meta)
        .await
        .unwrap();

    // Advancing must invite B, not complete the session
    let after = h.engine.advance_session(session.session_id).await.unwrap();
    assert_eq!(after.status, SessionStatus::Active);

    let b_now = h.store.load_signer(b.signer_id).await.unwrap().unwrap();
    assert_eq!(b_now.status, SignerStatus::Sent);
    assert_eq!(h.notifier.sent_to("grace@x.test").await.len(), 1);

    // B signs; the next advance finalizes
    h.engine
        .capture_signature(b.signer_id, &[], PNG, &h.meta)
        .await
        .unwrap();
    let done = h.engine.advance_session(session.session_id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn parallel_session_completes_only_after_every_signer() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Parallel,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    for signer in &signers {
        h.engine.send_to_signer(signer.signer_id, &h.meta).await.unwrap();
    }

    h.engine
        .capture_signature(signers[0].signer_id, &[], PNG, &h.meta)
        .await
        .unwrap();
    let still_active = h.engine.advance_session(session.session_id).await.unwrap();
    assert_eq!(still_active.status, SessionStatus::Active);

    h.engine
        .capture_signature(signers[1].signer_id, &[], PNG, &h.meta)
        .await
        .unwrap();
    let done = h.engine.advance_session(session.session_id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
}

#[tokio::test]
async fn completion_seals_the_document_and_mirrors_the_contract() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &[SignerSpec::external("Ada", "ada@x.test")],
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    // A positioned signature field for the signer
    let field = SigningField::new(
        session.session_id,
        signers[0].signer_id,
        FieldType::Signature,
        2,
        100.0,
        200.0,
        60.0,
        20.0,
    );
    h.store.save_field(&field).await.unwrap();

    h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();
    h.engine
        .capture_signature(signers[0].signer_id, &[], PNG, &h.meta)
        .await
        .unwrap();
    let done = h.engine.advance_session(session.session_id).await.unwrap();

    // Sealed output differs from the source and is retrievable
    let final_hash = done.final_document_hash.unwrap();
    assert_ne!(final_hash, done.document_hash);
    let sealed = h.blobs.fetch(done.final_storage_path.as_deref().unwrap()).await.unwrap();
    assert!(sealed.len() > SOURCE_PDF.len());

    // Contract mirror flipped
    let mirrored = h.store.load_contract(contract.contract_id).await.unwrap().unwrap();
    assert_eq!(mirrored.signing_status, ContractSigningStatus::Signed);

    // Completion notices: signer + initiator
    assert_eq!(h.notifier.sent_to("ada@x.test").await.len(), 2); // invite + completion
    assert_eq!(h.notifier.sent_to("ops@x.test").await.len(), 1);

    // Trail ends with completed
    let trail = h.engine.audit_trail(session.session_id).await.unwrap();
    assert_eq!(trail.last().unwrap().event, SigningEvent::Completed);
}

#[tokio::test]
async fn decline_cancels_the_whole_session_for_everyone() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Parallel,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    let raw_a = h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();
    h.engine.send_to_signer(signers[1].signer_id, &h.meta).await.unwrap();

    h.engine
        .decline(
            signers[1].signer_id,
            Some("terms unacceptable".to_string()),
            &h.meta,
        )
        .await
        .unwrap();

    let cancelled = h.store.load_session(session.session_id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);

    // Every subsequent touch of the session fails uniformly
    let err = h.engine.validate_token(&raw_a, &h.meta).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionInactive));
    let err = h
        .engine
        .capture_signature(signers[0].signer_id, &[], PNG, &h.meta)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionInactive));
    let err = h.engine.advance_session(session.session_id).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionInactive));

    // Initiator was told who declined
    let notices = h.notifier.sent_to("ops@x.test").await;
    assert!(notices.iter().any(|n| n.subject == "Signing declined"));
}

#[tokio::test]
async fn a_signer_cannot_sign_twice() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Parallel,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    let raw = h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();
    h.engine
        .capture_signature(signers[0].signer_id, &[], PNG, &h.meta)
        .await
        .unwrap();

    // Session is still active (second signer outstanding), so the signed
    // signer's own guard fires
    let err = h
        .engine
        .capture_signature(signers[0].signer_id, &[], PNG, &h.meta)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadySigned));

    let err = h.engine.validate_token(&raw, &h.meta).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadySigned));

    let err = h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadySigned));
}

#[tokio::test]
async fn token_validation_stamps_a_single_view() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    let raw = h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();

    let viewed = h.engine.validate_token(&raw, &h.meta).await.unwrap();
    assert_eq!(viewed.status, SignerStatus::Viewed);
    assert!(viewed.viewed_at.is_some());

    // Idempotent: a second validation does not append another viewed row
    h.engine.validate_token(&raw, &h.meta).await.unwrap();
    let trail = h.engine.audit_trail(session.session_id).await.unwrap();
    let views = trail.iter().filter(|l| l.event == SigningEvent::Viewed).count();
    assert_eq!(views, 1);
}

#[tokio::test]
async fn bogus_and_expired_tokens_are_rejected() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    let err = h
        .engine
        .validate_token("not-a-real-token", &h.meta)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidToken));

    let raw = h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();

    // Force the token past its expiry
    let mut signer = h.store.load_signer(signers[0].signer_id).await.unwrap().unwrap();
    signer.token_expires_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    h.store.save_signer(&signer).await.unwrap();

    let err = h.engine.validate_token(&raw, &h.meta).await.unwrap_err();
    assert!(matches!(err, EngineError::TokenExpired));
}

#[tokio::test]
async fn reminder_rotates_the_token() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    let old_raw = h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();
    let new_raw = h.engine.send_reminder(signers[0].signer_id, &h.meta).await.unwrap();
    assert_ne!(old_raw, new_raw);

    // Old link is dead, new one works
    let err = h.engine.validate_token(&old_raw, &h.meta).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidToken));
    h.engine.validate_token(&new_raw, &h.meta).await.unwrap();

    let trail = h.engine.audit_trail(session.session_id).await.unwrap();
    assert!(trail.iter().any(|l| l.event == SigningEvent::ReminderSent));
}

#[tokio::test]
async fn captured_field_values_land_on_assigned_fields_only() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Parallel,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    let own = SigningField::new(
        session.session_id,
        signers[0].signer_id,
        FieldType::Text,
        1,
        10.0,
        10.0,
        80.0,
        12.0,
    );
    let other = SigningField::new(
        session.session_id,
        signers[1].signer_id,
        FieldType::Text,
        1,
        10.0,
        40.0,
        80.0,
        12.0,
    );
    h.store.save_field(&own).await.unwrap();
    h.store.save_field(&other).await.unwrap();

    h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();
    h.engine
        .capture_signature(
            signers[0].signer_id,
            &[
                FieldValue {
                    field_id: own.field_id,
                    value: Some("Acme Corp".to_string()),
                },
                // An attempt to fill another signer's field is ignored
                FieldValue {
                    field_id: other.field_id,
                    value: Some("tampered".to_string()),
                },
            ],
            PNG,
            &h.meta,
        )
        .await
        .unwrap();

    let fields = h.store.list_fields_for_session(session.session_id).await.unwrap();
    let own_now = fields.iter().find(|f| f.field_id == own.field_id).unwrap();
    let other_now = fields.iter().find(|f| f.field_id == other.field_id).unwrap();
    assert_eq!(own_now.value.as_deref(), Some("Acme Corp"));
    assert!(own_now.filled_at.is_some());
    assert!(other_now.value.is_none());
}

#[tokio::test]
async fn non_image_signature_payloads_are_rejected() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Parallel,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();

    h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();
    let err = h
        .engine
        .capture_signature(signers[0].signer_id, &[], b"<html>not an image</html>", &h.meta)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    // Signer untouched
    let signer = h.store.load_signer(signers[0].signer_id).await.unwrap().unwrap();
    assert_eq!(signer.status, SignerStatus::Sent);
}

#[tokio::test]
async fn lapsed_sessions_expire_on_first_touch() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();
    let signers = h.store.list_signers(session.session_id).await.unwrap();
    let raw = h.engine.send_to_signer(signers[0].signer_id, &h.meta).await.unwrap();

    // Push the session past its window
    let mut lapsed = h.store.load_session(session.session_id).await.unwrap().unwrap();
    lapsed.expires_at = chrono::Utc::now() - chrono::Duration::days(1);
    h.store.save_session(&lapsed).await.unwrap();

    let err = h.engine.validate_token(&raw, &h.meta).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionInactive));

    let expired = h.store.load_session(session.session_id).await.unwrap().unwrap();
    assert_eq!(expired.status, SessionStatus::Expired);
    let trail = h.engine.audit_trail(session.session_id).await.unwrap();
    assert!(trail.iter().any(|l| l.event == SigningEvent::Expired));
}

#[tokio::test]
async fn administrative_cancel_closes_the_session() {
    let h = harness();
    let contract = seed_contract(&h).await;
    let session = h
        .engine
        .create_session(
            contract.contract_id,
            &two_signers(),
            SigningOrder::Sequential,
            &h.actor,
            &h.meta,
        )
        .await
        .unwrap();

    let cancelled = h
        .engine
        .cancel_session(session.session_id, &h.actor)
        .await
        .unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);

    // Cancelling twice reports the session inactive
    let err = h
        .engine
        .cancel_session(session.session_id, &h.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionInactive));
}
